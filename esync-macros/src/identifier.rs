use crate::derive_utils::{DeriveSet, Flags, ensure_serde_transparent};
use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Item, Type, parse_macro_input};

pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let flags = parse_macro_input!(attr as Flags);
    if let Err(err) = flags.check(&["debug"]) {
        return err.to_compile_error().into();
    }

    let mut st = match parse_macro_input!(item as Item) {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[identifier] only on struct")
                .to_compile_error()
                .into();
        }
    };

    let inner_ty: Type = match &st.fields {
        syn::Fields::Unnamed(f) if f.unnamed.len() == 1 => f.unnamed[0].ty.clone(),
        other => {
            return syn::Error::new(
                other.span(),
                "#[identifier] requires a tuple struct with exactly one field, e.g. struct X(String);",
            )
            .to_compile_error()
            .into();
        }
    };

    let mut derives = DeriveSet::new();
    if flags.get("debug", true) {
        derives.require(syn::parse_quote!(Debug));
    }
    derives.require(syn::parse_quote!(Clone));
    derives.require(syn::parse_quote!(serde::Serialize));
    derives.require(syn::parse_quote!(serde::Deserialize));
    derives.require(syn::parse_quote!(PartialEq));
    derives.require(syn::parse_quote!(Eq));
    derives.require(syn::parse_quote!(Hash));
    derives.require(syn::parse_quote!(PartialOrd));
    derives.require(syn::parse_quote!(Ord));
    derives.apply(&mut st.attrs);
    ensure_serde_transparent(&mut st.attrs);

    let ident = &st.ident;
    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();

    // 字符串标识额外提供借用与 &str 转换
    let string_impls = if is_string(&inner_ty) {
        quote! {
            impl #impl_generics #ident #ty_generics #where_clause {
                pub fn as_str(&self) -> &str { self.0.as_str() }
            }

            impl #impl_generics ::core::convert::From<&str> for #ident #ty_generics #where_clause {
                fn from(value: &str) -> Self { Self(value.to_owned()) }
            }

            impl #impl_generics ::core::borrow::Borrow<str> for #ident #ty_generics #where_clause {
                fn borrow(&self) -> &str { self.0.as_str() }
            }
        }
    } else {
        quote! {}
    };

    let out = quote! {
        #st

        impl #impl_generics #ident #ty_generics #where_clause {
            pub fn new(value: impl ::core::convert::Into<#inner_ty>) -> Self { Self(value.into()) }

            pub fn into_inner(self) -> #inner_ty { self.0 }
        }

        impl #impl_generics ::std::str::FromStr for #ident #ty_generics #where_clause {
            type Err = <#inner_ty as ::std::str::FromStr>::Err;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                s.parse::<#inner_ty>().map(Self)
            }
        }

        impl #impl_generics ::std::fmt::Display for #ident #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl #impl_generics ::core::convert::AsRef<#inner_ty> for #ident #ty_generics #where_clause {
            fn as_ref(&self) -> &#inner_ty { &self.0 }
        }

        impl #impl_generics ::core::convert::From<#inner_ty> for #ident #ty_generics #where_clause {
            fn from(value: #inner_ty) -> Self { Self(value) }
        }

        impl #impl_generics ::core::convert::From<#ident #ty_generics> for #inner_ty #where_clause {
            fn from(value: #ident #ty_generics) -> Self { value.0 }
        }

        #string_impls
    };

    TokenStream::from(out)
}

fn is_string(ty: &Type) -> bool {
    match ty {
        Type::Path(p) if p.qself.is_none() => p
            .path
            .segments
            .last()
            .map(|seg| seg.ident == "String" && seg.arguments.is_none())
            .unwrap_or(false),
        _ => false,
    }
}
