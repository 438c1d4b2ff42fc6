use crate::derive_utils::{DeriveSet, Flags, ensure_serde_transparent};
use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Item, parse_macro_input};

pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let flags = parse_macro_input!(attr as Flags);
    if let Err(err) = flags.check(&["debug", "ordered"]) {
        return err.to_compile_error().into();
    }

    let mut derives = DeriveSet::new();
    if flags.get("debug", true) {
        derives.require(syn::parse_quote!(Debug));
    }
    derives.require(syn::parse_quote!(Default));
    derives.require(syn::parse_quote!(Clone));
    derives.require(syn::parse_quote!(serde::Serialize));
    derives.require(syn::parse_quote!(serde::Deserialize));
    derives.require(syn::parse_quote!(PartialEq));
    derives.require(syn::parse_quote!(Eq));
    if flags.get("ordered", false) {
        derives.require(syn::parse_quote!(PartialOrd));
        derives.require(syn::parse_quote!(Ord));
        derives.require(syn::parse_quote!(Hash));
    }

    match parse_macro_input!(item as Item) {
        Item::Struct(mut st) => {
            let newtype = matches!(&st.fields, syn::Fields::Unnamed(f) if f.unnamed.len() == 1);
            derives.apply(&mut st.attrs);
            if newtype {
                ensure_serde_transparent(&mut st.attrs);
            }
            TokenStream::from(quote! { #st })
        }
        Item::Enum(mut en) => {
            derives.apply(&mut en.attrs);
            TokenStream::from(quote! { #en })
        }
        other => syn::Error::new(other.span(), "#[value_object] only supports struct or enum")
            .to_compile_error()
            .into(),
    }
}
