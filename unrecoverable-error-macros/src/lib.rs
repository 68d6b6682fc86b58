//! Procedural macros for the `unrecoverable-error` crate.
//!
//! - `#[derive(UnrecoverableError)]`: implements `UnrecoverableError` and `Display`
//!   from an optional `#[unrecoverable_error("...")]` format attribute
//! - `unrecoverable_error!`: raises an unrecoverable error through the installed handler
//!
//! Format strings name fields directly. Named fields are written as `{field}` or
//! `{field:?}`, tuple fields by their index, `{0}` or `{1:?}`. Any format spec
//! after the colon is kept, so `{size:>6}` and `{0:#x}` work as with `write!`,
//! and `{{` and `}}` are literal braces. Width and precision arguments must be
//! literals, `{field:width$}` is not supported:
//!
//! ```rust
//! use unrecoverable_error::UnrecoverableError;
//!
//! #[derive(Debug, UnrecoverableError)]
//! enum StartupError {
//!     #[unrecoverable_error("Stack of {size} bytes is below the minimum {min}")]
//!     StackTooSmall { size: usize, min: usize },
//!     #[unrecoverable_error("Unknown board: {0:?}")]
//!     UnknownBoard(&'static str),
//!     NoClock,
//! }
//! ```
//!
//! A variant or struct without the attribute displays as its own name.

extern crate proc_macro;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use regex::{Captures, Regex};
use syn::{Attribute, Data, DeriveInput, Fields, Ident, LitStr, parse_macro_input};

/// Derives `UnrecoverableError` and `Display` for a struct or an enum.
///
/// The type must implement `Debug`.
#[proc_macro_derive(UnrecoverableError, attributes(unrecoverable_error))]
pub fn derive_unrecoverable_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_derive(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_derive(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let arms = match &input.data {
        Data::Struct(data) => {
            let format = format_attribute(&input.attrs)?;
            vec![display_arm(quote!(Self), name, &data.fields, format)?]
        }
        Data::Enum(data) => data
            .variants
            .iter()
            .map(|variant| {
                let variant_name = &variant.ident;
                let format = format_attribute(&variant.attrs)?;
                display_arm(quote!(Self::#variant_name), variant_name, &variant.fields, format)
            })
            .collect::<syn::Result<Vec<_>>>()?,
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                name,
                "UnrecoverableError cannot be derived for unions",
            ));
        }
    };

    // Empty enums have no arms, and `match *self {}` is the only body that type checks.
    let body = if arms.is_empty() {
        quote! { match *self {} }
    } else {
        quote! {
            match self {
                #(#arms)*
            }
        }
    };

    Ok(quote! {
        impl #impl_generics ::unrecoverable_error::UnrecoverableError for #name #ty_generics #where_clause {}

        impl #impl_generics ::core::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                #body
            }
        }
    })
}

fn format_attribute(attrs: &[Attribute]) -> syn::Result<Option<LitStr>> {
    for attr in attrs {
        if attr.path().is_ident("unrecoverable_error") {
            return attr.parse_args::<LitStr>().map(Some);
        }
    }
    Ok(None)
}

/// Rewrites named placeholders such as `{name}` or `{name:>4}` into positional
/// ones with the same spec and returns the referenced names in order of
/// appearance. Escaped braces are left alone.
fn positional_format(format: &str) -> (String, Vec<String>) {
    let placeholder =
        Regex::new(r"\{\{|\}\}|\{(\w+)(:[^{}]*)?\}").expect("placeholder pattern is valid");
    let mut names = Vec::new();
    let rewritten = placeholder
        .replace_all(format, |caps: &Captures<'_>| match caps.get(1) {
            Some(name) => {
                names.push(name.as_str().to_string());
                let spec = caps.get(2).map_or("", |spec| spec.as_str());
                format!("{{{}}}", spec)
            }
            None => caps[0].to_string(),
        })
        .into_owned();
    (rewritten, names)
}

fn binding(name: &str) -> Ident {
    if name.bytes().all(|b| b.is_ascii_digit()) {
        format_ident!("__field{}", name)
    } else {
        format_ident!("{}", name)
    }
}

fn display_arm(
    path: TokenStream2,
    name: &Ident,
    fields: &Fields,
    format: Option<LitStr>,
) -> syn::Result<TokenStream2> {
    let Some(format) = format else {
        let text = name.to_string();
        return Ok(quote! { #path { .. } => f.write_str(#text), });
    };

    let (rewritten, names) = positional_format(&format.value());

    let pattern = match fields {
        Fields::Named(named) => {
            for used in &names {
                if !named
                    .named
                    .iter()
                    .any(|field| field.ident.as_ref().is_some_and(|ident| ident == used))
                {
                    return Err(syn::Error::new_spanned(
                        &format,
                        format!("no field named `{}`", used),
                    ));
                }
            }
            let mut used: Vec<Ident> = names.iter().map(|n| binding(n)).collect();
            used.sort();
            used.dedup();
            quote! { { #(#used,)* .. } }
        }
        Fields::Unnamed(unnamed) => {
            let bindings = (0..unnamed.unnamed.len()).map(|index| {
                let index = index.to_string();
                if names.contains(&index) {
                    let ident = binding(&index);
                    quote! { #ident }
                } else {
                    quote! { _ }
                }
            });
            quote! { ( #(#bindings),* ) }
        }
        Fields::Unit => {
            if let Some(used) = names.first() {
                return Err(syn::Error::new_spanned(
                    &format,
                    format!("unit type has no field `{}`", used),
                ));
            }
            quote! {}
        }
    };

    let arguments = names.iter().map(|n| binding(n));
    let rewritten = LitStr::new(&rewritten, format.span());
    Ok(quote! { #path #pattern => ::core::write!(f, #rewritten #(, #arguments)*), })
}

/// Raises an unrecoverable error.
///
/// The expression must evaluate to a value implementing `UnrecoverableError`.
/// The installed handler is called with the call-site location, and the macro
/// never returns.
#[proc_macro]
pub fn unrecoverable_error(input: TokenStream) -> TokenStream {
    let error = parse_macro_input!(input as syn::Expr);

    quote! {
        ::unrecoverable_error::handle_unrecoverable_error(&#error)
    }
    .into()
}
