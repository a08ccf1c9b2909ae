//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations
//! from `#[error("...")]` attributes. Replacement for the `thiserror`
//! crate.
//!
//! # Usage
//!
//! ```ignore
//! use basm_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum VmError {
//!     #[error("unknown function: {name}")]
//!     FunctionNotFound { name: String },
//!
//!     #[error("expected register, got {0}")]
//!     ExpectedRegister(String),
//!
//!     #[error("division by zero")]
//!     DivisionByZero,
//! }
//! ```
//!
//! # Interpolation
//!
//! Named fields are destructured into scope, so `{field}` placeholders
//! resolve through inline format captures; every named placeholder must
//! match a field. Tuple fields are bound as `f0..fN` and handed to
//! `write!` positionally, so `{0}`-style placeholders index them
//! directly. Each field must appear in the message, the same rule
//! `write!` itself enforces.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Data, DeriveInput, Fields, LitStr, parse_macro_input};

/// Derives `Display` and `Error` for an enum or struct.
pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let display_body = match &input.data {
        Data::Enum(data) => {
            let arms = data
                .variants
                .iter()
                .map(|variant| {
                    let ident = &variant.ident;
                    let message =
                        message_for(&variant.attrs, variant, &format!("variant `{ident}`"))?;
                    let (pattern, write_call) = render(&variant.fields, &message);
                    Ok(quote! { Self::#ident #pattern => #write_call, })
                })
                .collect::<syn::Result<Vec<_>>>()?;
            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data) => {
            let message = message_for(&input.attrs, input, &format!("type `{name}`"))?;
            let (pattern, write_call) = render(&data.fields, &message);
            quote! {
                let Self #pattern = self;
                #write_call
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #display_body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Builds the destructuring pattern and the `write!` call for one set of
/// fields.
///
/// Named fields come into scope under their own names and the message
/// interpolates them by capture; tuple fields are passed positionally.
/// Unit shapes need no pattern at all.
fn render(fields: &Fields, message: &str) -> (TokenStream2, TokenStream2) {
    match fields {
        Fields::Unit => (quote! {}, quote! { write!(f, #message) }),
        Fields::Named(named) => {
            let bindings: Vec<_> = named.named.iter().map(|field| &field.ident).collect();
            (
                quote! { { #(#bindings),* } },
                quote! { write!(f, #message) },
            )
        }
        Fields::Unnamed(unnamed) => {
            let bindings: Vec<_> = (0..unnamed.unnamed.len())
                .map(|i| format_ident!("f{i}"))
                .collect();
            (
                quote! { ( #(#bindings),* ) },
                quote! { write!(f, #message, #(#bindings),*) },
            )
        }
    }
}

/// Pulls the message out of an `#[error("...")]` attribute.
fn message_for<T: ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<String> {
    for attr in attrs {
        if !attr.path().is_ident("error") {
            continue;
        }
        let lit: LitStr = attr.parse_args().map_err(|_| {
            syn::Error::new_spanned(
                attr,
                "invalid #[error] attribute: expected a string literal, \
                 e.g. #[error(\"unknown function: {name}\")]",
            )
        })?;
        return Ok(lit.value());
    }

    Err(syn::Error::new_spanned(
        target,
        format!(
            "missing #[error(\"...\")] attribute on {target_desc}; \
             every error variant must declare a display message"
        ),
    ))
}
