use quote::ToTokens;
use syn::{Attribute, Path, Token, punctuated::Punctuated};

/// 一组待写回的 derive：先放宏要求的，再追加用户已写的（去重）
pub(crate) struct DeriveSet {
    paths: Vec<Path>,
    keys: Vec<String>,
}

impl DeriveSet {
    pub(crate) fn new() -> Self {
        Self {
            paths: Vec::new(),
            keys: Vec::new(),
        }
    }

    pub(crate) fn require(&mut self, path: Path) {
        let key = derive_key(&path);
        if !self.keys.contains(&key) {
            self.keys.push(key);
            self.paths.push(path);
        }
    }

    /// 将 derive 合并写回属性列表：移除原有 `#[derive]`，以合并后的单个 `#[derive]` 置于最前
    pub(crate) fn apply(mut self, attrs: &mut Vec<Attribute>) {
        let mut retained = Vec::with_capacity(attrs.len());

        for attr in attrs.drain(..) {
            if !attr.path().is_ident("derive") {
                retained.push(attr);
                continue;
            }

            match attr.parse_args_with(Punctuated::<Path, Token![,]>::parse_terminated) {
                Ok(list) => list.into_iter().for_each(|p| self.require(p)),
                // 无法解析的 derive 原样保留，交由编译器报错
                Err(_) => retained.push(attr),
            }
        }

        let paths = &self.paths;
        let merged: Attribute = syn::parse_quote!(#[derive(#(#paths),*)]);
        *attrs = std::iter::once(merged).chain(retained).collect();
    }
}

/// 若属性中尚无 `#[serde(transparent)]`，则追加
pub(crate) fn ensure_serde_transparent(attrs: &mut Vec<Attribute>) {
    let present = attrs.iter().any(|a| {
        a.path().is_ident("serde") && a.to_token_stream().to_string().contains("transparent")
    });

    if !present {
        attrs.push(syn::parse_quote!(#[serde(transparent)]));
    }
}

// 归一化 derive 的比较键，`Serialize` 与 `serde::Serialize` 视为同一个
fn derive_key(path: &Path) -> String {
    match path.segments.last() {
        Some(last) => {
            let ident = last.ident.to_string();
            match ident.as_str() {
                "Serialize" | "Deserialize" => format!("serde::{ident}"),
                _ => ident,
            }
        }
        None => path.to_token_stream().to_string(),
    }
}

/// 宏参数：形如 `key = true, other = false` 的布尔开关列表
pub(crate) struct Flags {
    entries: Vec<(syn::Ident, bool)>,
}

impl Flags {
    /// 读取开关值；未出现时返回 `default`
    pub(crate) fn get(&self, key: &str, default: bool) -> bool {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
            .unwrap_or(default)
    }

    /// 校验仅出现允许的键且不重复
    pub(crate) fn check(&self, allowed: &[&str]) -> syn::Result<()> {
        for (idx, (key, _)) in self.entries.iter().enumerate() {
            if !allowed.iter().any(|a| key == a) {
                return Err(syn::Error::new(
                    key.span(),
                    format!("unknown key in attribute; expected one of: {}", allowed.join(", ")),
                ));
            }
            if self.entries[..idx].iter().any(|(k, _)| k == key) {
                return Err(syn::Error::new(
                    key.span(),
                    format!("duplicate key '{key}' in attribute"),
                ));
            }
        }
        Ok(())
    }
}

impl syn::parse::Parse for Flags {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut entries = Vec::new();

        while !input.is_empty() {
            let key: syn::Ident = input.parse()?;
            let _eq: Token![=] = input.parse()?;
            let value: syn::LitBool = input.parse()?;
            entries.push((key, value.value()));

            if input.is_empty() {
                break;
            }
            let _comma: Token![,] = input.parse()?;
        }

        Ok(Self { entries })
    }
}
