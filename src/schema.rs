//! Static descriptions of the JSON shapes the client understands.
//!
//! Every remote call gets one [`Schema`] per level of nesting. Schemas are
//! plain `static` items that refer to each other by reference, so the tree of
//! a response is a flat registry of named shapes composed by identity rather
//! than nested type declarations.
//!
//! Records are declared with [`record!`], which emits the struct, its schema
//! and the [`Record`] impl from one declaration:
//!
//! ```ignore
//! record! {
//!     /// One assignment configuration entry.
//!     pub struct AssignmentConfig: ASSIGNMENT_CONFIG = "mod_assign_get_assignments.course.assignment.config" {
//!         required plugin: String => Kind::Str,
//!         optional id: Option<i64> => Kind::Int,
//!     }
//! }
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Declared type of a single field.
#[derive(Debug, Clone, Copy)]
pub enum Kind {
    Int,
    Float,
    Str,
    Bool,
    /// Any JSON value, kept verbatim.
    Any,
    /// A nested record.
    Record(&'static Schema),
    /// A list of nested records. `null` decodes to an empty list.
    List(&'static Schema),
}

impl Kind {
    /// Whether `value` has the runtime shape of a primitive kind. Nested kinds
    /// only check the outer container; the decoder recurses into them.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Kind::Int => value.is_i64(),
            Kind::Float => value.is_number(),
            Kind::Str => value.is_string(),
            Kind::Bool => value.is_boolean(),
            Kind::Any => true,
            Kind::Record(_) => value.is_object(),
            Kind::List(_) => value.is_array(),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Int => write!(f, "int"),
            Kind::Float => write!(f, "float"),
            Kind::Str => write!(f, "string"),
            Kind::Bool => write!(f, "bool"),
            Kind::Any => write!(f, "any"),
            Kind::Record(schema) => write!(f, "record {}", schema.name()),
            Kind::List(schema) => write!(f, "list of {}", schema.name()),
        }
    }
}

/// One named field of a schema. `key` is the exact key of the remote payload.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub key: &'static str,
    pub kind: Kind,
    pub required: bool,
}

impl Field {
    pub const fn required(key: &'static str, kind: Kind) -> Self {
        Self {
            key,
            kind,
            required: true,
        }
    }

    pub const fn optional(key: &'static str, kind: Kind) -> Self {
        Self {
            key,
            kind,
            required: false,
        }
    }

    /// Value substituted when the field is absent (optional fields) or
    /// `null` (list fields).
    pub fn default_value(&self) -> Value {
        match self.kind {
            Kind::List(_) => Value::Array(Vec::new()),
            _ => Value::Null,
        }
    }
}

/// An ordered set of fields describing one decodable JSON object.
///
/// A schema without fields would accept any object and is rejected: [`record!`]
/// does not parse an empty field list, and [`Schema::new`] panics, which fails
/// the build when evaluated for a `static`.
#[derive(Debug)]
pub struct Schema {
    pub(crate) name: &'static str,
    pub(crate) fields: &'static [Field],
}

impl Schema {
    pub const fn new(name: &'static str, fields: &'static [Field]) -> Self {
        assert!(!fields.is_empty(), "schema declares no fields");
        Self { name, fields }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &'static [Field] {
        self.fields
    }

    pub fn field(&self, key: &str) -> Option<&'static Field> {
        self.fields.iter().find(|field| field.key == key)
    }

    /// All declared keys.
    pub fn keys(&self) -> BTreeSet<&'static str> {
        self.fields.iter().map(|field| field.key).collect()
    }

    pub fn required_keys(&self) -> BTreeSet<&'static str> {
        self.fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.key)
            .collect()
    }
}

/// A typed value with a static schema. Decoding goes through
/// [`crate::decode::Decoder`], which validates against [`Record::schema`]
/// before serde builds the struct.
pub trait Record: Serialize + DeserializeOwned {
    fn schema() -> &'static Schema;
}

/// Declares a record struct together with its schema.
///
/// Each field line is `required|optional <ident> [("key")]: <type> => <kind>`.
/// The optional `("key")` names the remote key when it is not a valid Rust
/// identifier (for example `type`).
macro_rules! record {
    (@field required, $key:expr, $kind:expr) => {
        $crate::schema::Field::required($key, $kind)
    };
    (@field optional, $key:expr, $kind:expr) => {
        $crate::schema::Field::optional($key, $kind)
    };
    (@key $field:ident) => {
        stringify!($field)
    };
    (@key $field:ident $key:literal) => {
        $key
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $schema:ident = $path:literal {
            $(
                $(#[$fmeta:meta])*
                $presence:ident $field:ident $( ( $key:literal ) )? : $fty:ty => $kind:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $( #[serde(rename = $key)] )?
                pub $field: $fty,
            )+
        }

        $vis static $schema: $crate::schema::Schema = $crate::schema::Schema {
            name: $path,
            fields: &[
                $(
                    $crate::schema::record!(
                        @field $presence,
                        $crate::schema::record!(@key $field $( $key )?),
                        $kind
                    ),
                )+
            ],
        };

        impl $crate::schema::Record for $name {
            fn schema() -> &'static $crate::schema::Schema {
                &$schema
            }
        }
    };
}

pub(crate) use record;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    record! {
        struct Leaf: LEAF = "test.leaf" {
            required id: i64 => Kind::Int,
            optional kind ("type"): Option<String> => Kind::Str,
        }
    }

    record! {
        struct Branch: BRANCH = "test.branch" {
            required name: String => Kind::Str,
            optional leaves: Vec<Leaf> => Kind::List(&LEAF),
        }
    }

    #[test]
    #[should_panic(expected = "schema declares no fields")]
    fn test_empty_schema_is_rejected() {
        let _ = Schema::new("empty", &[]);
    }

    #[test]
    fn test_record_macro_builds_schema() {
        assert_eq!(Leaf::schema().name(), "test.leaf");
        let keys: Vec<_> = Leaf::schema().keys().into_iter().collect();
        assert_eq!(keys, vec!["id", "type"]);
        assert_eq!(
            Leaf::schema().required_keys().into_iter().collect::<Vec<_>>(),
            vec!["id"]
        );
    }

    #[test]
    fn test_renamed_key_serializes_verbatim() {
        let leaf = Leaf {
            id: 3,
            kind: Some("file".into()),
        };
        assert_eq!(
            serde_json::to_value(&leaf).unwrap(),
            json!({"id": 3, "type": "file"})
        );
    }

    #[test]
    fn test_nested_schema_is_referenced_by_identity() {
        let field = Branch::schema().field("leaves").unwrap();
        match field.kind {
            Kind::List(schema) => assert!(std::ptr::eq(schema, Leaf::schema())),
            other => panic!("unexpected kind {other}"),
        }
        assert!(!field.required);
        assert_eq!(field.default_value(), json!([]));
    }

    #[test]
    fn test_kind_accepts() {
        assert!(Kind::Int.accepts(&json!(5)));
        assert!(!Kind::Int.accepts(&json!(5.5)));
        assert!(Kind::Int.accepts(&json!(i64::MAX)));
        assert!(!Kind::Int.accepts(&json!(u64::MAX)));
        assert!(Kind::Float.accepts(&json!(5)));
        assert!(!Kind::Str.accepts(&json!(5)));
        assert!(Kind::Bool.accepts(&json!(false)));
        assert!(Kind::Any.accepts(&json!(null)));
        assert!(Kind::List(&LEAF).accepts(&json!([])));
        assert!(!Kind::Record(&LEAF).accepts(&json!([])));
    }
}
