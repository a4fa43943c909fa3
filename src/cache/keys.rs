//! Cache key definitions.
//!
//! Requests declare their simple fields as an ordered list of [`Field`]s.
//! Keys render as `TypeName{name:value,...}`; correlating a command with a
//! query is plain iteration over both declarations.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

use crate::dispatch::Request;

use super::query::Query;

/// Type of a simple field, compared when correlating fields across requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Decimal,
    Str,
    Date,
    DateTime,
    /// A fieldless enum, tagged with its type name.
    Enum(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldType {
    pub kind: FieldKind,
    pub nullable: bool,
}

/// Fixed-point decimal: `mantissa * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal {
    mantissa: i128,
    scale: u32,
}

impl Decimal {
    pub const fn new(mantissa: i128, scale: u32) -> Self {
        Self { mantissa, scale }
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }
}

/// Digits in `i128::MAX`; larger scales only pad zeros.
const MAX_FIXED_SCALE: u32 = 38;

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        let sign = if self.mantissa < 0 { "-" } else { "" };
        if self.scale > MAX_FIXED_SCALE {
            return write!(f, "{sign}{digits}e-{}", self.scale);
        }
        let scale = self.scale as usize;
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (whole, fraction) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{whole}.{fraction}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Str(String),
    Date(Date),
    DateTime(OffsetDateTime),
    Enum(&'static str),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::UInt(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::Decimal(value) => write!(f, "{value}"),
            // Quoted and escaped so separators inside values cannot collide.
            FieldValue::Str(value) => write!(f, "\"{}\"", value.escape_debug()),
            FieldValue::Date(value) => write!(f, "{value}"),
            FieldValue::DateTime(value) => match value.format(&Rfc3339) {
                Ok(formatted) => f.write_str(&formatted),
                Err(_) => write!(f, "{value}"),
            },
            FieldValue::Enum(variant) => f.write_str(variant),
        }
    }
}

/// A value that can be declared as a simple field.
///
/// Implemented for numerics, `bool`, `String`, [`Decimal`], dates, and
/// `Option` of any of these. Fieldless enums implement it by hand with
/// [`FieldKind::Enum`].
pub trait Scalar: Sized {
    const KIND: FieldKind;
    const NULLABLE: bool = false;

    fn to_value(&self) -> FieldValue;

    fn from_value(value: &FieldValue) -> Option<Self>;
}

impl<T: Scalar> Scalar for Option<T> {
    const KIND: FieldKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> FieldValue {
        match self {
            Some(value) => value.to_value(),
            None => FieldValue::Null,
        }
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! integer_scalar {
    ($($ty:ty => $kind:ident, $variant:ident, $wide:ty;)*) => {
        $(
            impl Scalar for $ty {
                const KIND: FieldKind = FieldKind::$kind;

                fn to_value(&self) -> FieldValue {
                    FieldValue::$variant(<$wide>::from(*self))
                }

                fn from_value(value: &FieldValue) -> Option<Self> {
                    match value {
                        FieldValue::$variant(inner) => <$ty>::try_from(*inner).ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

integer_scalar! {
    i8 => I8, Int, i64;
    i16 => I16, Int, i64;
    i32 => I32, Int, i64;
    i64 => I64, Int, i64;
    u8 => U8, UInt, u64;
    u16 => U16, UInt, u64;
    u32 => U32, UInt, u64;
    u64 => U64, UInt, u64;
}

impl Scalar for f32 {
    const KIND: FieldKind = FieldKind::F32;

    fn to_value(&self) -> FieldValue {
        FieldValue::Float(f64::from(*self))
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Float(inner) => Some(*inner as f32),
            _ => None,
        }
    }
}

impl Scalar for f64 {
    const KIND: FieldKind = FieldKind::F64;

    fn to_value(&self) -> FieldValue {
        FieldValue::Float(*self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Float(inner) => Some(*inner),
            _ => None,
        }
    }
}

impl Scalar for bool {
    const KIND: FieldKind = FieldKind::Bool;

    fn to_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(inner) => Some(*inner),
            _ => None,
        }
    }
}

impl Scalar for String {
    const KIND: FieldKind = FieldKind::Str;

    fn to_value(&self) -> FieldValue {
        FieldValue::Str(self.clone())
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Str(inner) => Some(inner.clone()),
            _ => None,
        }
    }
}

impl Scalar for Decimal {
    const KIND: FieldKind = FieldKind::Decimal;

    fn to_value(&self) -> FieldValue {
        FieldValue::Decimal(*self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Decimal(inner) => Some(*inner),
            _ => None,
        }
    }
}

impl Scalar for Date {
    const KIND: FieldKind = FieldKind::Date;

    fn to_value(&self) -> FieldValue {
        FieldValue::Date(*self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Date(inner) => Some(*inner),
            _ => None,
        }
    }
}

impl Scalar for OffsetDateTime {
    const KIND: FieldKind = FieldKind::DateTime;

    fn to_value(&self) -> FieldValue {
        FieldValue::DateTime(*self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::DateTime(inner) => Some(*inner),
            _ => None,
        }
    }
}

/// Name and type of a declared field, without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
}

impl FieldSpec {
    pub const fn of<T: Scalar>(name: &'static str) -> Self {
        Self {
            name,
            ty: FieldType {
                kind: T::KIND,
                nullable: T::NULLABLE,
            },
        }
    }
}

/// A declared simple field with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: &'static str,
    ty: FieldType,
    value: FieldValue,
}

impl Field {
    pub fn new<T: Scalar>(name: &'static str, value: &T) -> Self {
        Self {
            name,
            ty: FieldType {
                kind: T::KIND,
                nullable: T::NULLABLE,
            },
            value: value.to_value(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ty(&self) -> FieldType {
        self.ty
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    fn matches(&self, spec: &FieldSpec) -> bool {
        self.name == spec.name && self.ty == spec.ty
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

/// Fields copied from one request onto the declaration of another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    fields: Vec<Field>,
}

impl FieldSet {
    /// Keep the `source` fields matching a `target` spec by name and type,
    /// ordered as `target` declares them.
    pub fn correlate(source: &[Field], target: &[FieldSpec]) -> Self {
        let fields = target
            .iter()
            .filter_map(|spec| source.iter().find(|field| field.matches(spec)).cloned())
            .collect();
        Self { fields }
    }

    /// Typed lookup; `None` when the field is absent or of another type.
    pub fn get<T: Scalar>(&self, name: &str) -> Option<T> {
        let ty = FieldSpec::of::<T>("").ty;
        self.fields
            .iter()
            .find(|field| field.name == name && field.ty == ty)
            .and_then(|field| T::from_value(&field.value))
    }

    pub fn as_slice(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Builds a request from fields correlated off another request.
///
/// `FIELDS` must list the same simple fields, in the same order, as
/// [`Request::fields`] returns.
pub trait FromFields: Sized {
    const FIELDS: &'static [FieldSpec];

    fn from_fields(fields: &FieldSet) -> Self;
}

/// Identifies one cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// `TypeName{name:value,...}` over `fields` in the given order.
    pub fn from_fields(type_name: &str, fields: &[Field]) -> Self {
        let body = fields
            .iter()
            .map(Field::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Self(format!("{type_name}{{{body}}}"))
    }

    /// A caller-supplied key, namespaced by its type: `TypeName{custom}`.
    pub fn custom(type_name: &str, custom: &str) -> Self {
        Self(format!("{type_name}{{{custom}}}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Key for a query instance: the custom strategy when the type supplies
/// one, the declared simple fields otherwise.
pub fn derive_key<Q: Query>(query: &Q) -> CacheKey {
    match query.cache_key() {
        Some(custom) => CacheKey::custom(Q::type_name(), &custom),
        None => CacheKey::from_fields(Q::type_name(), &query.fields()),
    }
}

/// Key of query type `Q` built from the `source` fields it shares by name
/// and type.
pub fn correlated_key<Q: Request + FromFields>(source: &[Field]) -> CacheKey {
    let shared = FieldSet::correlate(source, Q::FIELDS);
    CacheKey::from_fields(Q::type_name(), shared.as_slice())
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use super::*;

    struct Todos {
        search: Option<String>,
        cache_bust: Option<bool>,
    }

    impl Request for Todos {
        type Response = Vec<String>;

        fn type_name() -> &'static str {
            "Todos"
        }

        fn fields(&self) -> Vec<Field> {
            vec![
                Field::new("search", &self.search),
                Field::new("cache_bust", &self.cache_bust),
            ]
        }
    }

    impl Query for Todos {}

    impl FromFields for Todos {
        const FIELDS: &'static [FieldSpec] = &[
            FieldSpec::of::<Option<String>>("search"),
            FieldSpec::of::<Option<bool>>("cache_bust"),
        ];

        fn from_fields(fields: &FieldSet) -> Self {
            Self {
                search: fields.get("search").flatten(),
                cache_bust: fields.get("cache_bust").flatten(),
            }
        }
    }

    struct Labelled {
        label: String,
        tags: Vec<String>,
    }

    impl Request for Labelled {
        type Response = ();

        fn type_name() -> &'static str {
            "Labelled"
        }

        fn fields(&self) -> Vec<Field> {
            vec![Field::new("label", &self.label)]
        }
    }

    impl Query for Labelled {}

    struct ByCode {
        code: String,
    }

    impl Request for ByCode {
        type Response = ();

        fn type_name() -> &'static str {
            "ByCode"
        }

        fn fields(&self) -> Vec<Field> {
            vec![Field::new("code", &self.code)]
        }
    }

    impl Query for ByCode {
        fn cache_key(&self) -> Option<String> {
            Some(self.code.to_lowercase())
        }
    }

    #[test]
    fn null_fields_render_as_null() {
        let key = derive_key(&Todos {
            search: None,
            cache_bust: None,
        });
        insta::assert_snapshot!(key.as_str(), @"Todos{search:null,cache_bust:null}");
    }

    #[test]
    fn strings_are_quoted() {
        let key = derive_key(&Todos {
            search: Some("milk".to_string()),
            cache_bust: Some(false),
        });
        insta::assert_snapshot!(key.as_str(), @r#"Todos{search:"milk",cache_bust:false}"#);
    }

    #[test]
    fn equal_fields_derive_equal_keys() {
        let first = Todos {
            search: Some("a".to_string()),
            cache_bust: None,
        };
        let second = Todos {
            search: Some("a".to_string()),
            cache_bust: None,
        };
        assert_eq!(derive_key(&first), derive_key(&second));
    }

    #[test]
    fn differing_fields_derive_distinct_keys() {
        let none = derive_key(&Todos {
            search: None,
            cache_bust: None,
        });
        let literal_null = derive_key(&Todos {
            search: Some("null".to_string()),
            cache_bust: None,
        });
        let empty = derive_key(&Todos {
            search: Some(String::new()),
            cache_bust: None,
        });
        assert_ne!(none, literal_null);
        assert_ne!(none, empty);
        assert_ne!(literal_null, empty);
    }

    #[test]
    fn separators_inside_values_do_not_collide() {
        let first = derive_key(&Todos {
            search: Some("x\",cache_bust:true".to_string()),
            cache_bust: None,
        });
        let second = derive_key(&Todos {
            search: Some("x".to_string()),
            cache_bust: Some(true),
        });
        assert_ne!(first, second);
    }

    #[test]
    fn undeclared_fields_are_ignored() {
        let first = derive_key(&Labelled {
            label: "a".to_string(),
            tags: vec!["x".to_string()],
        });
        let second = derive_key(&Labelled {
            label: "a".to_string(),
            tags: Vec::new(),
        });
        assert_eq!(first, second);
    }

    #[test]
    fn custom_key_is_namespaced_by_type() {
        let key = derive_key(&ByCode {
            code: "BIO-101".to_string(),
        });
        insta::assert_snapshot!(key.as_str(), @"ByCode{bio-101}");
    }

    #[test]
    fn decimal_renders_fixed_point() {
        assert_eq!(Decimal::new(12345, 2).to_string(), "123.45");
        assert_eq!(Decimal::new(-5, 3).to_string(), "-0.005");
        assert_eq!(Decimal::new(7, 0).to_string(), "7");
        assert_ne!(
            Decimal::new(10, 1).to_string(),
            Decimal::new(100, 2).to_string()
        );
    }

    #[test]
    fn decimal_with_oversized_scale_renders_exponent() {
        assert_eq!(Decimal::new(5, u32::MAX).to_string(), "5e-4294967295");
        assert_eq!(Decimal::new(-12, 39).to_string(), "-12e-39");

        let widest = Decimal::new(5, 38).to_string();
        assert_eq!(widest.len(), "0.".len() + 38);
        assert!(widest.ends_with("05"));
    }

    #[test]
    fn dates_render_in_iso_format() {
        let field = Field::new("on", &date!(2024 - 03 - 01));
        assert_eq!(field.to_string(), "on:2024-03-01");

        let field = Field::new("at", &datetime!(2024-03-01 10:30 UTC));
        assert_eq!(field.to_string(), "at:2024-03-01T10:30:00Z");
    }

    #[test]
    fn correlation_matches_name_and_type() {
        let source = vec![
            Field::new("search", &Some("milk".to_string())),
            Field::new("cache_bust", &true),
            Field::new("unrelated", &3_i32),
        ];

        let shared = FieldSet::correlate(&source, Todos::FIELDS);

        // `cache_bust` is `bool` here but `Option<bool>` on the query.
        assert_eq!(shared.len(), 1);
        assert_eq!(
            shared.get::<Option<String>>("search"),
            Some(Some("milk".to_string()))
        );
        assert_eq!(shared.get::<Option<bool>>("cache_bust"), None);
    }

    #[test]
    fn correlation_follows_target_order() {
        let source = vec![
            Field::new("cache_bust", &Some(true)),
            Field::new("search", &None::<String>),
        ];

        let key = correlated_key::<Todos>(&source);
        assert_eq!(key.as_str(), "Todos{search:null,cache_bust:true}");
        assert_eq!(
            key,
            derive_key(&Todos {
                search: None,
                cache_bust: Some(true),
            })
        );
    }

    #[test]
    fn correlation_without_shared_fields_is_empty() {
        let key = correlated_key::<Todos>(&[Field::new("number", &5_i32)]);
        assert_eq!(key.as_str(), "Todos{}");
    }

    #[test]
    fn from_fields_rebuilds_query() {
        let source = vec![Field::new("search", &Some("tea".to_string()))];
        let query = Todos::from_fields(&FieldSet::correlate(&source, Todos::FIELDS));
        assert_eq!(query.search.as_deref(), Some("tea"));
        assert_eq!(query.cache_bust, None);
    }

    #[test]
    fn integer_widths_do_not_correlate() {
        let spec = FieldSpec::of::<i64>("number");
        let shared = FieldSet::correlate(&[Field::new("number", &5_i32)], &[spec]);
        assert!(shared.is_empty());
    }
}
