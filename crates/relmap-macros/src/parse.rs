//! Parsing of `#[derive(Model)]` input.
//!
//! Struct and field attributes are collected into [`ModelDef`] and
//! [`FieldDef`]; each field is also classified into the slot kind its
//! accessor will use.

use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, GenericArgument, Generics, Ident, Lit,
    PathArguments, Result, Type,
};

/// Parsed struct with `#[derive(Model)]`.
#[derive(Debug)]
pub struct ModelDef {
    pub name: Ident,
    pub generics: Generics,
    /// Table name override from `#[relmap(table = "...")]`.
    pub table: Option<String>,
    /// Declared fields, in schema order.
    pub fields: Vec<FieldDef>,
    /// The embedded change tracker, if the struct carries one.
    pub tracker: Option<Ident>,
}

/// How a field is exposed to the mapping layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Scalar,
    Embedded,
    /// `Option<T>`: belongs-to or has-one.
    One,
    /// `Option<Vec<T>>`: has-many.
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindAttr {
    BelongsTo,
    HasOne,
}

/// Parsed field.
#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    pub slot: Slot,
    pub column: Option<String>,
    pub primary: bool,
    pub skip: bool,
    pub reference: Option<String>,
    pub foreign_key: Option<String>,
    pub through: Option<String>,
    pub autoload: bool,
    pub autosave: bool,
    pub kind: Option<KindAttr>,
}

/// Types that map to a single column without an attribute.
const SCALARS: &[&str] = &[
    "i8",
    "i16",
    "i32",
    "i64",
    "u8",
    "u16",
    "u32",
    "u64",
    "f32",
    "f64",
    "bool",
    "String",
    "Vec",
    "Timestamp",
    "Value",
];

pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    let name = input.ident.clone();
    let table = parse_struct_attrs(&input.attrs)?;

    let named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(Error::new_spanned(
                    input,
                    "Model requires a struct with named fields",
                ));
            }
        },
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not unions",
            ));
        }
    };

    let mut fields = Vec::new();
    let mut tracker: Option<Ident> = None;
    for field in named {
        if is_tracker(&field.ty) {
            if tracker.is_some() {
                return Err(Error::new_spanned(
                    field,
                    "a record can carry only one Dirty tracker",
                ));
            }
            tracker.clone_from(&field.ident);
            continue;
        }
        fields.push(parse_field(field)?);
    }

    Ok(ModelDef {
        name,
        generics: input.generics.clone(),
        table,
        fields,
        tracker,
    })
}

/// Parse struct-level `#[relmap(...)]` attributes.
///
/// Supported keys:
/// - `table = "name"` (overrides the pluralized snake_case type name)
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<Option<String>> {
    let mut table = None;
    for attr in attrs {
        if !attr.path().is_ident("relmap") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                table = Some(string_value(&meta, "table")?);
                Ok(())
            } else {
                Err(meta.error("unknown relmap struct attribute"))
            }
        })?;
    }
    Ok(table)
}

/// Field attributes before the slot is decided.
#[derive(Default)]
struct FieldAttrs {
    column: Option<String>,
    primary: bool,
    skip: bool,
    reference: Option<String>,
    foreign_key: Option<String>,
    through: Option<String>,
    autoload: bool,
    autosave: bool,
    kind: Option<KindAttr>,
    embedded: bool,
    scalar: bool,
}

impl FieldAttrs {
    fn names_association(&self) -> bool {
        self.reference.is_some()
            || self.foreign_key.is_some()
            || self.through.is_some()
            || self.autoload
            || self.autosave
            || self.kind.is_some()
    }
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let attrs = parse_field_attrs(&field.attrs)?;
    let slot = if attrs.skip {
        Slot::Scalar
    } else {
        classify(field, &attrs)?
    };

    Ok(FieldDef {
        name,
        slot,
        column: attrs.column,
        primary: attrs.primary,
        skip: attrs.skip,
        reference: attrs.reference,
        foreign_key: attrs.foreign_key,
        through: attrs.through,
        autoload: attrs.autoload,
        autosave: attrs.autosave,
        kind: attrs.kind,
    })
}

fn parse_field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("relmap") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("primary") {
                result.primary = true;
            } else if path.is_ident("skip") {
                result.skip = true;
            } else if path.is_ident("autoload") {
                result.autoload = true;
            } else if path.is_ident("autosave") {
                result.autosave = true;
            } else if path.is_ident("auto") {
                result.autoload = true;
                result.autosave = true;
            } else if path.is_ident("embedded") {
                result.embedded = true;
            } else if path.is_ident("scalar") {
                result.scalar = true;
            } else if path.is_ident("belongs_to") || path.is_ident("has_one") {
                let kind = if path.is_ident("belongs_to") {
                    KindAttr::BelongsTo
                } else {
                    KindAttr::HasOne
                };
                if result.kind.is_some_and(|k| k != kind) {
                    return Err(meta.error("belongs_to and has_one are mutually exclusive"));
                }
                result.kind = Some(kind);
            } else if path.is_ident("column") {
                result.column = Some(string_value(&meta, "column")?);
            } else if path.is_ident("reference") {
                result.reference = Some(string_value(&meta, "reference")?);
            } else if path.is_ident("foreign_key") {
                result.foreign_key = Some(string_value(&meta, "foreign_key")?);
            } else if path.is_ident("through") {
                result.through = Some(string_value(&meta, "through")?);
            } else {
                return Err(meta.error("unknown relmap field attribute"));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

fn string_value(meta: &syn::meta::ParseNestedMeta<'_>, key: &str) -> Result<String> {
    let value: Lit = meta.value()?.parse()?;
    if let Lit::Str(lit_str) = value {
        Ok(lit_str.value())
    } else {
        Err(Error::new_spanned(
            value,
            format!("expected string literal for {key}"),
        ))
    }
}

/// Decide the slot kind of a field from its attributes and type.
fn classify(field: &Field, attrs: &FieldAttrs) -> Result<Slot> {
    if attrs.embedded && attrs.scalar {
        return Err(Error::new_spanned(
            field,
            "embedded and scalar are mutually exclusive",
        ));
    }
    if (attrs.embedded || attrs.scalar) && attrs.names_association() {
        return Err(Error::new_spanned(
            field,
            "association options need an Option<T> or Option<Vec<T>> field",
        ));
    }
    if attrs.embedded {
        return Ok(Slot::Embedded);
    }
    if attrs.scalar {
        return Ok(Slot::Scalar);
    }

    if let Some(inner) = option_inner(&field.ty) {
        if vec_inner(inner).is_some_and(|elem| !is_byte(elem)) {
            return Ok(Slot::Many);
        }
        if attrs.names_association() || !is_scalar(inner) {
            return Ok(Slot::One);
        }
        return Ok(Slot::Scalar);
    }

    if attrs.names_association() {
        return Err(Error::new_spanned(
            &field.ty,
            "association options need an Option<T> or Option<Vec<T>> field",
        ));
    }
    Ok(Slot::Scalar)
}

fn last_ident(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(type_path) if type_path.qself.is_none() => type_path.path.segments.last(),
        _ => None,
    }
}

/// The single type argument of `Wrapper<T>` when the last segment is `wrapper`.
fn type_argument<'t>(ty: &'t Type, wrapper: &str) -> Option<&'t Type> {
    let segment = last_ident(ty)?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

pub fn option_inner(ty: &Type) -> Option<&Type> {
    type_argument(ty, "Option")
}

fn vec_inner(ty: &Type) -> Option<&Type> {
    type_argument(ty, "Vec")
}

fn is_byte(ty: &Type) -> bool {
    last_ident(ty).is_some_and(|segment| segment.ident == "u8")
}

fn is_scalar(ty: &Type) -> bool {
    match ty {
        Type::Array(_) => true,
        _ => last_ident(ty).is_some_and(|segment| SCALARS.iter().any(|s| segment.ident == s)),
    }
}

fn is_tracker(ty: &Type) -> bool {
    last_ident(ty).is_some_and(|segment| segment.ident == "Dirty")
}
