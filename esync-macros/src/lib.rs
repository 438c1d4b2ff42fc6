//! esync 过程宏
//!
//! - `#[identifier]`：为单字段 tuple struct 形式的标识类型（`AggregateId(String)`、
//!   `RequestId(String)` 等）补齐派生、`serde(transparent)` 与常用转换；
//! - `#[value_object]`：为值对象补齐派生集合，可选择追加排序/哈希派生。
//!
use proc_macro::TokenStream;

mod derive_utils;
mod identifier;
mod value_object;

/// 标识类型宏
///
/// 仅支持单字段 tuple struct，例如 `struct AggregateId(String);`：
/// - 合并/追加派生：Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord
/// - 追加 `#[serde(transparent)]`，线上形态与内部值一致
/// - 提供 `new`、`into_inner`、`Display`、`FromStr`、`AsRef`、双向 `From`
/// - 内部类型为 `String` 时额外提供 `as_str`、`From<&str>` 与 `Borrow<str>`
///
/// 参数：`#[identifier(debug = false)]` 关闭 Debug 派生（默认开启）
#[proc_macro_attribute]
pub fn identifier(attr: TokenStream, item: TokenStream) -> TokenStream {
    identifier::expand(attr, item)
}

/// 值对象宏
///
/// 支持结构体（具名或 tuple）与枚举：
/// - 合并/追加派生：Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq
/// - `ordered = true` 时追加 PartialOrd, Ord, Hash
/// - 单字段 tuple struct 自动追加 `#[serde(transparent)]`
///
/// 参数：`#[value_object(debug = false, ordered = true)]`
#[proc_macro_attribute]
pub fn value_object(attr: TokenStream, item: TokenStream) -> TokenStream {
    value_object::expand(attr, item)
}
