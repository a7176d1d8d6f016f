//! Procedural macros for the docsafe project.
//!
//! Provides `#[derive(Record)]`, which implements the `Record` identity accessor
//! for a struct from its `id` field.

#[allow(unused_extern_crates)]
extern crate self as docsafe_macros;

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Field, Fields, parse_macro_input, spanned::Spanned};

/// Derives `docsafe::document::Record`.
///
/// The identity comes from the field named `id`, or from the field marked
/// `#[record(id)]`. Its type must implement `RecordId` (`String` or
/// `Option<String>`); an empty string counts as no identity.
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Record)]
/// struct Review {
///     #[record(id)]
///     #[serde(rename = "id")]
///     review_id: Option<String>,
///     stars: u8,
/// }
/// ```
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new(
                    input.ident.span(),
                    "Record can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.ident.span(),
                "Record can only be derived for structs",
            ));
        }
    };

    let marked = fields
        .iter()
        .filter_map(|field| is_marked(field).transpose())
        .collect::<syn::Result<Vec<_>>>()?;

    let id_field = match marked.as_slice() {
        [field] => *field,
        [] => fields
            .iter()
            .find(|field| field.ident.as_ref().is_some_and(|ident| ident == "id"))
            .ok_or_else(|| {
                syn::Error::new(
                    input.ident.span(),
                    "Record requires a field named `id` or a field marked #[record(id)]",
                )
            })?,
        [_, second, ..] => {
            return Err(syn::Error::new(
                second.span(),
                "only one field can be marked #[record(id)]",
            ));
        }
    };

    let name = &input.ident;
    let field = &id_field.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::docsafe::document::Record for #name #ty_generics #where_clause {
            fn id(&self) -> ::core::option::Option<&str> {
                ::docsafe::document::RecordId::as_record_id(&self.#field)
            }
        }
    })
}

/// Returns the field when it carries `#[record(id)]`.
fn is_marked(field: &Field) -> syn::Result<Option<&Field>> {
    for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("record")) {
        let mut marked = false;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                marked = true;
                Ok(())
            } else {
                Err(meta.error("unsupported record attribute, expected `id`"))
            }
        })?;

        if marked {
            return Ok(Some(field));
        }
    }

    Ok(None)
}
