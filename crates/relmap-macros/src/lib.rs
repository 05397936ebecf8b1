//! Derive macro for relmap records.
//!
//! `#[derive(Model)]` writes the `relmap_core::Model` implementation that
//! would otherwise be spelled out by hand: the `Schema` with its field
//! declarations, and the index-based `field`/`field_mut` accessors that hand
//! out scalar, embedded, one and many slots. A `Dirty` field becomes the
//! record's change tracker.
//!
//! The macro is used through the `relmap` facade.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;

mod parse;

use parse::{FieldDef, KindAttr, ModelDef, Slot, parse_model};

/// Derive macro for the `Model` trait.
///
/// Fields are declared in struct order. The slot kind comes from the type:
/// `Option<Vec<T>>` is a has-many, `Option<T>` of a non-column type is a
/// belongs-to or has-one, everything else is a column. A field of type
/// `Dirty` is the change tracker and is not a column.
///
/// # Attributes
///
/// - `#[relmap(table = "name")]` - Override the table name (defaults to the pluralized snake_case struct name)
/// - `#[relmap(primary)]` - Mark the field as (part of) the primary key
/// - `#[relmap(column = "name")]` - Override the column name, or the column prefix of an embedded struct
/// - `#[relmap(skip)]` - Leave the field unmapped
/// - `#[relmap(embedded)]` - Merge the columns of a nested `Model` into this record
/// - `#[relmap(scalar)]` - Treat an `Option<T>` of a custom column type as a column
/// - `#[relmap(reference = "field")]` - Owner-side key of an association
/// - `#[relmap(foreign_key = "field")]` - Target-side key of an association
/// - `#[relmap(through = "table")]` - Join table of a many-to-many association
/// - `#[relmap(autoload)]`, `#[relmap(autosave)]`, `#[relmap(auto)]` - Association flags
/// - `#[relmap(belongs_to)]`, `#[relmap(has_one)]` - Force the association kind
///
/// # Example
///
/// ```ignore
/// use relmap::prelude::*;
///
/// #[derive(Debug, Default, Model)]
/// struct Order {
///     id: i64,
///     buyer_id: i64,
///     buyer: Option<User>,
///     items: Option<Vec<Item>>,
///     #[relmap(through = "order_tags")]
///     tags: Option<Vec<Tag>>,
///     tracker: Dirty,
/// }
/// ```
#[proc_macro_derive(Model, attributes(relmap))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let model = match parse_model(&input) {
        Ok(m) => m,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_model_impl(&model).into()
}

fn generate_model_impl(model: &ModelDef) -> TokenStream2 {
    let name = &model.name;
    let (impl_generics, ty_generics, where_clause) = model.generics.split_for_impl();

    let table = model
        .table
        .as_ref()
        .map(|table| quote! { .table(#table) });
    let declarations = model.fields.iter().map(field_declaration);

    let indices = 0..model.fields.len();
    let readers = model.fields.iter().map(|field| accessor(field, false));
    let writers = model.fields.iter().map(|field| accessor(field, true));

    let dirty = model.tracker.as_ref().map(|tracker| {
        quote! {
            fn dirty(&mut self) -> ::std::option::Option<&mut relmap_core::Dirty> {
                ::std::option::Option::Some(&mut self.#tracker)
            }
        }
    });

    let indices_mut = indices.clone();
    quote! {
        impl #impl_generics relmap_core::Model for #name #ty_generics #where_clause {
            fn schema() -> relmap_core::Schema {
                relmap_core::Schema::new()
                    #table
                    #(.field(#declarations))*
            }

            fn field(&self, index: usize) -> relmap_core::FieldRef<'_> {
                match index {
                    #(#indices => #readers,)*
                    _ => relmap_core::FieldRef::Missing,
                }
            }

            fn field_mut(&mut self, index: usize) -> relmap_core::FieldMut<'_> {
                match index {
                    #(#indices_mut => #writers,)*
                    _ => relmap_core::FieldMut::Missing,
                }
            }

            #dirty
        }
    }
}

/// The `FieldDef` builder chain for one field.
fn field_declaration(field: &FieldDef) -> TokenStream2 {
    let name = field.name.to_string();
    let mut chain = quote! { relmap_core::FieldDef::new(#name) };

    if let Some(column) = &field.column {
        chain.extend(quote! { .column(#column) });
    }
    if field.primary {
        chain.extend(quote! { .primary() });
    }
    if field.skip {
        chain.extend(quote! { .skip() });
    }
    if let Some(reference) = &field.reference {
        chain.extend(quote! { .reference(#reference) });
    }
    if let Some(foreign_key) = &field.foreign_key {
        chain.extend(quote! { .foreign_key(#foreign_key) });
    }
    if let Some(through) = &field.through {
        chain.extend(quote! { .through(#through) });
    }
    if field.autoload {
        chain.extend(quote! { .autoload() });
    }
    if field.autosave {
        chain.extend(quote! { .autosave() });
    }
    match field.kind {
        Some(KindAttr::BelongsTo) => chain.extend(quote! { .belongs_to() }),
        Some(KindAttr::HasOne) => chain.extend(quote! { .has_one() }),
        None => {}
    }
    chain
}

/// `FieldRef::<slot>(&self.<field>)` or its `FieldMut` counterpart.
fn accessor(field: &FieldDef, mutable: bool) -> TokenStream2 {
    let ident = &field.name;
    let (wrapper, borrow) = if mutable {
        (quote! { relmap_core::FieldMut }, quote! { &mut self.#ident })
    } else {
        (quote! { relmap_core::FieldRef }, quote! { &self.#ident })
    };
    if field.skip {
        return quote! { #wrapper::Missing };
    }
    match field.slot {
        Slot::Scalar => quote! { #wrapper::scalar(#borrow) },
        Slot::Embedded => quote! { #wrapper::embedded(#borrow) },
        Slot::One => quote! { #wrapper::one(#borrow) },
        Slot::Many => quote! { #wrapper::many(#borrow) },
    }
}
