//! Type dictionary cache.
//!
//! Resolves `(type, attribute)` to the physical encoding descriptor the
//! propagation engine needs: data-type code, attribute short code, data
//! partition label, nullable and propagate flags, and the referenced node
//! type for edge-valued attributes. The dictionary is built once at startup
//! from a [`DictSource`] and is immutable afterwards; share it behind an
//! `Arc`, no locking required.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::info;

use crate::error::{GraphError, Result};

/// Physical data-type of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Signed integer, propagated into the numeric list.
    Int,
    /// Float, propagated into the numeric list.
    Float,
    /// UTF-8 string, propagated into the string list.
    Str,
    /// Boolean, propagated into the boolean list.
    Bool,
    /// Raw bytes, propagated into the binary list.
    Bin,
    /// RFC 3339 datetime string, propagated into the string list.
    DateTime,
    /// Edge-valued attribute; the value is a child node identifier.
    Node,
}

impl DataType {
    /// The compact code used in dictionary rows.
    pub fn code(self) -> &'static str {
        match self {
            DataType::Int => "I",
            DataType::Float => "F",
            DataType::Str => "S",
            DataType::Bool => "Bl",
            DataType::Bin => "B",
            DataType::DateTime => "DT",
            DataType::Node => "Nd",
        }
    }

    /// Parses a dictionary data-type code.
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "I" => Ok(DataType::Int),
            "F" => Ok(DataType::Float),
            "S" => Ok(DataType::Str),
            "Bl" => Ok(DataType::Bool),
            "B" => Ok(DataType::Bin),
            "DT" => Ok(DataType::DateTime),
            "Nd" => Ok(DataType::Node),
            other => Err(GraphError::Unmarshaling {
                routine: "DataType::from_code",
                reason: format!("unknown data-type code {other:?}"),
            }),
        }
    }
}

/// One raw dictionary row as loaded from the dictionary store.
#[derive(Clone, Debug, Deserialize)]
pub struct DictRow {
    /// Type long name.
    pub ty: String,
    /// Short name for the type, carried on each of its rows.
    pub ty_short: String,
    /// Attribute name.
    pub attr: String,
    /// Data-type code, see [`DataType::from_code`].
    pub dtype: String,
    /// Attribute short code used in physical sort keys.
    pub short: String,
    /// Data partition label.
    pub partition: String,
    /// Whether the attribute may be absent on a child.
    #[serde(default)]
    pub nullable: bool,
    /// Whether the attribute's value is denormalized into parent edges.
    #[serde(default)]
    pub propagate: bool,
    /// Referenced node type for edge-valued attributes.
    #[serde(default)]
    pub target_ty: Option<String>,
}

/// Resolved physical encoding descriptor for one `(type, attribute)`.
#[derive(Clone, Debug, PartialEq)]
pub struct AttrDescriptor {
    /// Attribute name.
    pub name: String,
    /// Physical data-type.
    pub dtype: DataType,
    /// Short code substituted into physical sort keys.
    pub short: String,
    /// Data partition label.
    pub partition: String,
    /// Whether absent values are legal for this attribute.
    pub nullable: bool,
    /// Whether this attribute participates in propagation.
    pub propagate: bool,
    /// Referenced node type, for edge-valued attributes.
    pub target_ty: Option<String>,
}

/// Supplies raw dictionary rows at startup.
pub trait DictSource {
    /// Returns every dictionary row.
    fn rows(&self) -> Result<Vec<DictRow>>;
}

/// A [`DictSource`] backed by a JSON array of rows.
pub struct JsonSource(pub String);

impl DictSource for JsonSource {
    fn rows(&self) -> Result<Vec<DictRow>> {
        serde_json::from_str(&self.0).map_err(|e| GraphError::Unmarshaling {
            routine: "JsonSource::rows",
            reason: e.to_string(),
        })
    }
}

/// The immutable `(type, attribute)` lookup structure.
#[derive(Debug)]
pub struct TypeDictionary {
    attrs: FxHashMap<(String, String), AttrDescriptor>,
    long_to_short: FxHashMap<String, String>,
    short_to_long: FxHashMap<String, String>,
}

impl TypeDictionary {
    /// Builds the dictionary from a source.
    ///
    /// An empty row set is a startup-fatal [`GraphError::NoItemFound`];
    /// duplicate `(type, attribute)` rows and conflicting type short names
    /// are surfaced as unmarshaling errors.
    pub fn load(source: &dyn DictSource) -> Result<Self> {
        let rows = source.rows()?;
        if rows.is_empty() {
            return Err(GraphError::NoItemFound {
                routine: "TypeDictionary::load",
                what: "type dictionary".to_owned(),
            });
        }

        let mut attrs = FxHashMap::default();
        let mut long_to_short = FxHashMap::default();
        let mut short_to_long = FxHashMap::default();
        for row in rows {
            let dtype = DataType::from_code(&row.dtype)?;
            if dtype == DataType::Node && row.target_ty.is_none() {
                return Err(GraphError::Unmarshaling {
                    routine: "TypeDictionary::load",
                    reason: format!("edge attribute {}.{} has no target type", row.ty, row.attr),
                });
            }

            if let Some(prev) = long_to_short.insert(row.ty.clone(), row.ty_short.clone()) {
                if prev != row.ty_short {
                    return Err(GraphError::Unmarshaling {
                        routine: "TypeDictionary::load",
                        reason: format!("type {} maps to short names {prev} and {}", row.ty, row.ty_short),
                    });
                }
            }
            short_to_long.insert(row.ty_short.clone(), row.ty.clone());

            let descriptor = AttrDescriptor {
                name: row.attr.clone(),
                dtype,
                short: row.short,
                partition: row.partition,
                nullable: row.nullable,
                propagate: row.propagate,
                target_ty: row.target_ty,
            };
            if attrs.insert((row.ty.clone(), row.attr.clone()), descriptor).is_some() {
                return Err(GraphError::Unmarshaling {
                    routine: "TypeDictionary::load",
                    reason: format!("duplicate dictionary row for {}.{}", row.ty, row.attr),
                });
            }
        }

        info!(types = long_to_short.len(), attributes = attrs.len(), "dict.loaded");
        Ok(Self {
            attrs,
            long_to_short,
            short_to_long,
        })
    }

    /// Resolves the descriptor for `(ty, attr)`.
    pub fn attr(&self, ty: &str, attr: &str) -> Result<&AttrDescriptor> {
        self.attrs
            .get(&(ty.to_owned(), attr.to_owned()))
            .ok_or_else(|| GraphError::NoItemFound {
                routine: "TypeDictionary::attr",
                what: format!("{ty}.{attr}"),
            })
    }

    /// Short name for a type long name.
    pub fn type_short(&self, long: &str) -> Option<&str> {
        self.long_to_short.get(long).map(String::as_str)
    }

    /// Long name for a type short name.
    pub fn type_long(&self, short: &str) -> Option<&str> {
        self.short_to_long.get(short).map(String::as_str)
    }

    /// Iterates the propagated attributes of a type.
    pub fn propagated_attrs<'a>(
        &'a self,
        ty: &'a str,
    ) -> impl Iterator<Item = &'a AttrDescriptor> + 'a {
        self.attrs
            .iter()
            .filter(move |((t, _), d)| t == ty && d.propagate)
            .map(|(_, d)| d)
    }

    /// Number of attribute entries.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// True when the dictionary holds no entries. Unreachable after a
    /// successful [`load`](Self::load).
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}
