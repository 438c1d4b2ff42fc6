use esync_macros::value_object;

#[value_object(ordered = true)]
#[derive(Copy)]
struct Sequence(u64);

#[value_object]
struct Limits {
    max: u32,
    burst: u32,
}

#[value_object(debug = false)]
struct Secret(String);

#[value_object]
enum Mode {
    #[default]
    Fast,
    Safe,
}

fn main() {
    // 排序/哈希派生与 Copy 共存
    let a = Sequence(1);
    let b = a;
    assert!(Sequence(2) > b);
    assert_eq!(serde_json::to_string(&a).unwrap(), "1");

    let limits = Limits::default();
    assert_eq!(limits.clone(), Limits { max: 0, burst: 0 });
    let _ = format!("{limits:?}");

    let _ = Secret("s".into());
    let _mode: Mode = Default::default();
}
