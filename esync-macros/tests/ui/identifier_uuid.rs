use esync_macros::identifier;
use uuid::Uuid;

#[identifier]
struct TraceId(Uuid);

#[identifier(debug = false)]
struct SessionId(Uuid);

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId(..)")
    }
}

fn main() {
    let raw = Uuid::new_v4();
    let id = TraceId::new(raw);
    let parsed: TraceId = raw.to_string().parse().unwrap();
    assert_eq!(parsed, id);
    assert_eq!(id.into_inner(), raw);

    // 手写 Debug 可编译，说明未重复派生
    let sid = SessionId::new(Uuid::new_v4());
    assert_eq!(format!("{sid:?}"), "SessionId(..)");
}
