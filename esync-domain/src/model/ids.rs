use crate::value_object::ValueObject;
use esync_macros::identifier;

const MAX_ID_LEN: usize = 256;

/// 聚合标识（不透明字符串，聚合类型内唯一）
#[identifier]
pub struct AggregateId(String);

/// 请求标识：由命令生产方为每个客户端请求生成，用于幂等判定
#[identifier]
pub struct RequestId(String);

fn check_id(value: &str) -> Result<(), &'static str> {
    if value.trim().is_empty() {
        return Err("must not be blank");
    }
    if value.len() > MAX_ID_LEN {
        return Err("must be at most 256 bytes");
    }
    if value.chars().any(char::is_control) {
        return Err("must not contain control characters");
    }
    Ok(())
}

impl ValueObject for AggregateId {
    type Error = &'static str;

    fn validate(&self) -> Result<(), Self::Error> {
        check_id(self.as_str())
    }
}

impl ValueObject for RequestId {
    type Error = &'static str;

    fn validate(&self) -> Result<(), Self::Error> {
        check_id(self.as_str())
    }
}
