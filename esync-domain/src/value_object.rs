//! 值对象（Value Object）
//!
//! 无标识、以值相等为准的对象，用于封装不可变的概念性值与校验逻辑。
//!
use esync_macros::value_object;
use std::fmt;

/// 值对象抽象
pub trait ValueObject {
    /// 业务校验失败时的错误类型
    type Error;

    /// 校验值是否满足约束
    fn validate(&self) -> Result<(), Self::Error>;
}

/// 聚合版本号（乐观并发控制）
///
/// 不存在的聚合版本为 0；每成功应用一条命令恰好加 1。
///
/// ```
/// use esync_domain::value_object::Version;
///
/// let v = Version::INITIAL;
/// assert!(v.is_initial());
/// assert_eq!(v.next().value(), 1);
/// assert!(v.next() > v);
/// ```
#[value_object(ordered = true)]
#[derive(Copy)]
pub struct Version(u64);

impl Version {
    /// 聚合尚未创建时的版本
    pub const INITIAL: Version = Version(0);

    pub const fn from_value(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn is_initial(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_advances_by_exactly_one() {
        let mut v = Version::INITIAL;
        for expected in 1..=5 {
            v = v.next();
            assert_eq!(v.value(), expected);
        }
        assert!(!v.is_initial());
    }

    #[test]
    fn serializes_as_plain_number() {
        let v = Version::from_value(3);
        assert_eq!(serde_json::to_string(&v).unwrap(), "3");
        let back: Version = serde_json::from_str("3").unwrap();
        assert_eq!(back, v);
        assert_eq!(v.to_string(), "v3");
    }
}
