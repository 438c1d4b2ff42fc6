use esync_macros::identifier;
use std::collections::HashMap;

#[identifier]
pub struct OrderId(String);

fn main() {
    let id = OrderId::new("o-1");
    assert_eq!(id.as_str(), "o-1");
    assert_eq!(id.to_string(), "o-1");

    // &str / String 双向转换
    let from_str: OrderId = "o-1".into();
    assert_eq!(from_str, id);
    let raw: String = id.clone().into();
    assert_eq!(raw, "o-1");

    // 线上形态与内部字符串一致
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"o-1\"");
    let back: OrderId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);

    // Borrow<str> 允许以 &str 查询
    let mut index: HashMap<OrderId, u32> = HashMap::new();
    index.insert(id, 7);
    assert_eq!(index.get("o-1"), Some(&7));
}
