//! Entity metadata: the data-driven schema description the query engine reads.
//!
//! Every entity is described once (table, columns, primary key, relations,
//! capabilities) and registered in a [`Schema`]. Relations name their target
//! entity, which is resolved through the schema, so cyclic relations such as
//! client ↔ project are expressible.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{QueryError, QueryResult};

/// A row as the engine sees it: column (or relation) name → JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// BIGINT. Also used for unix timestamps.
    Integer,
    /// DOUBLE PRECISION.
    Float,
    Text,
    Boolean,
    /// JSON document stored as text.
    Json,
}

impl ColumnType {
    /// Canonical JSON form of a key value, or `None` if it cannot be one.
    pub fn coerce_key(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ColumnType::Integer, Value::Number(n)) => n.as_i64().map(Value::from),
            (ColumnType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ColumnType::Text, Value::String(_)) => Some(value.clone()),
            (ColumnType::Text, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ColumnType::Integer | ColumnType::Text, _) => None,
            _ => Some(value.clone()),
        }
    }
}

/// A storable column.
#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    pub name: String,
    pub column_type: ColumnType,
    /// Whether the database generates the value (auto-increment keys).
    pub generated: bool,
}

/// Which side of a one-to-one relation holds the foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneToOneSide {
    /// The foreign key column lives on this entity.
    Owner { join_column: String },
    /// The foreign key column lives on the target entity.
    Inverse { column: String },
}

/// Relation cardinality together with the columns that implement it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    ManyToOne {
        join_column: String,
    },
    OneToOne {
        side: OneToOneSide,
    },
    OneToMany {
        inverse_column: String,
    },
    ManyToMany {
        junction_table: String,
        source_column: String,
        target_column: String,
    },
}

/// A relation from one entity to another.
#[derive(Debug, Clone)]
pub struct RelationMetadata {
    /// Property name used in records and filters.
    pub name: String,
    /// Target entity name in the schema.
    pub target: String,
    pub kind: RelationKind,
}

impl RelationMetadata {
    pub fn many_to_one(name: &str, target: &str, join_column: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::ManyToOne {
                join_column: join_column.to_string(),
            },
        }
    }

    pub fn one_to_many(name: &str, target: &str, inverse_column: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::OneToMany {
                inverse_column: inverse_column.to_string(),
            },
        }
    }

    pub fn one_to_one(name: &str, target: &str, side: OneToOneSide) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::OneToOne { side },
        }
    }

    pub fn many_to_many(
        name: &str,
        target: &str,
        junction_table: &str,
        source_column: &str,
        target_column: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::ManyToMany {
                junction_table: junction_table.to_string(),
                source_column: source_column.to_string(),
                target_column: target_column.to_string(),
            },
        }
    }

    /// To-many relations hold arrays; to-one relations hold a record or null.
    pub fn is_to_many(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::OneToMany { .. } | RelationKind::ManyToMany { .. }
        )
    }

    /// The foreign key column on the owning entity, for owner-side to-one relations.
    pub fn owner_join_column(&self) -> Option<&str> {
        match &self.kind {
            RelationKind::ManyToOne { join_column }
            | RelationKind::OneToOne {
                side: OneToOneSide::Owner { join_column },
            } => Some(join_column),
            _ => None,
        }
    }
}

/// Capability descriptors consulted by the strategy registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Rows belong to a tenant stored in `column`.
    TenantScoped { column: String },
    /// Rows are owned by the user stored in `column`.
    Owned { column: String },
    /// Unix-second creation/change stamps.
    Timestamps { created: String, changed: String },
    /// Writes emit domain events.
    DomainEvents,
}

/// Complete description of one entity.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub name: String,
    pub table: String,
    pub primary_key: Vec<String>,
    pub columns: Vec<ColumnMetadata>,
    pub relations: Vec<RelationMetadata>,
    pub soft_delete_column: Option<String>,
    pub capabilities: Vec<Capability>,
}

impl EntityMetadata {
    /// Start describing an entity stored in `table`.
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: Vec::new(),
            columns: Vec::new(),
            relations: Vec::new(),
            soft_delete_column: None,
            capabilities: Vec::new(),
        }
    }

    /// Add a database-generated integer primary key column.
    pub fn generated_id(mut self, name: &str) -> Self {
        self.primary_key.push(name.to_string());
        self.columns.push(ColumnMetadata {
            name: name.to_string(),
            column_type: ColumnType::Integer,
            generated: true,
        });
        self
    }

    /// Add a column that is part of the primary key.
    pub fn key_column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.primary_key.push(name.to_string());
        self.column(name, column_type)
    }

    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnMetadata {
            name: name.to_string(),
            column_type,
            generated: false,
        });
        self
    }

    pub fn relation(mut self, relation: RelationMetadata) -> Self {
        self.relations.push(relation);
        self
    }

    /// Rows are soft deleted by stamping `column` (a nullable unix timestamp).
    pub fn soft_delete(mut self, column: &str) -> Self {
        self.soft_delete_column = Some(column.to_string());
        self.column(column, ColumnType::Integer)
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column, failing with `UnknownField`.
    pub fn column_meta(&self, name: &str) -> QueryResult<&ColumnMetadata> {
        self.find_column(name).ok_or_else(|| QueryError::UnknownField {
            entity: self.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn find_relation(&self, name: &str) -> Option<&RelationMetadata> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Look up a relation, failing with `UnknownRelation`.
    pub fn relation_meta(&self, name: &str) -> QueryResult<&RelationMetadata> {
        self.find_relation(name)
            .ok_or_else(|| QueryError::UnknownRelation {
                entity: self.name.clone(),
                relation: name.to_string(),
            })
    }

    pub fn has_capability(&self, matcher: impl Fn(&Capability) -> bool) -> bool {
        self.capabilities.iter().any(matcher)
    }

    pub fn emits_events(&self) -> bool {
        self.has_capability(|c| matches!(c, Capability::DomainEvents))
    }

    /// The single primary-key column. Relations require single-column keys.
    pub fn single_key(&self) -> QueryResult<&str> {
        match self.primary_key.as_slice() {
            [key] => Ok(key),
            _ => Err(QueryError::Configuration(format!(
                "{} must have a single-column primary key to take part in relations",
                self.name
            ))),
        }
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|k| k == column)
    }

    /// Copy only storable columns from an input record.
    pub fn regular_columns(&self, input: &Record) -> Record {
        input
            .iter()
            .filter(|(key, _)| self.find_column(key).is_some())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Primary-key values of a record, or `None` if any key column is missing or null.
    pub fn identity_of(&self, record: &Record) -> Option<Vec<Value>> {
        self.primary_key
            .iter()
            .map(|key| record.get(key).filter(|v| !v.is_null()).cloned())
            .collect()
    }

    /// Whether two records of this entity denote the same row.
    pub fn same_identity(&self, a: &Record, b: &Record) -> bool {
        match (self.identity_of(a), self.identity_of(b)) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }

    /// Normalize a relation item: a scalar is a primary-key value, an object is a record.
    ///
    /// Key values are coerced to their column type so that `"5"` and `5`
    /// denote the same integer-keyed row.
    pub fn identity_record(&self, item: &Value) -> QueryResult<Record> {
        let mut record = match item {
            Value::Object(map) => map.clone(),
            Value::Null => {
                return Err(QueryError::InvalidRecord(format!(
                    "null is not a valid {} reference",
                    self.name
                )));
            }
            scalar => {
                let key = self.single_key()?;
                let mut record = Record::new();
                record.insert(key.to_string(), scalar.clone());
                record
            }
        };
        for key in &self.primary_key {
            let Some(value) = record.get_mut(key).filter(|v| !v.is_null()) else {
                continue;
            };
            let column_type = self.column_meta(key)?.column_type;
            let coerced = column_type.coerce_key(value).ok_or_else(|| {
                QueryError::InvalidRecord(format!(
                    "{value} is not a valid {} key `{key}` ({column_type:?})",
                    self.name
                ))
            })?;
            *value = coerced;
        }
        Ok(record)
    }

    /// Key/value pairs of an id: a scalar for single keys, an object for composite keys.
    pub fn id_pairs(&self, id: &Value) -> QueryResult<Vec<(String, Value)>> {
        match id {
            Value::Object(map) => self
                .primary_key
                .iter()
                .map(|key| {
                    map.get(key)
                        .map(|v| (key.clone(), v.clone()))
                        .ok_or_else(|| {
                            QueryError::InvalidRecord(format!(
                                "id for {} is missing key column `{key}`",
                                self.name
                            ))
                        })
                })
                .collect(),
            scalar => Ok(vec![(self.single_key()?.to_string(), scalar.clone())]),
        }
    }

    /// Render an id from a record's key columns.
    pub fn id_of(&self, record: &Record) -> Option<Value> {
        let values = self.identity_of(record)?;
        if values.len() == 1 {
            return values.into_iter().next();
        }
        Some(Value::Object(
            self.primary_key.iter().cloned().zip(values).collect(),
        ))
    }
}

/// Registry of entity metadata, keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: BTreeMap<String, EntityMetadata>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity. Later registrations with the same name replace earlier ones.
    pub fn register(mut self, entity: EntityMetadata) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn entity(&self, name: &str) -> QueryResult<&EntityMetadata> {
        self.entities
            .get(name)
            .ok_or_else(|| QueryError::UnknownEntity(name.to_string()))
    }

    /// Target metadata of a relation.
    pub fn target_of(&self, relation: &RelationMetadata) -> QueryResult<&EntityMetadata> {
        self.entity(&relation.target)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entities.values()
    }

    /// Check that every relation target exists and relation keys are single-column.
    pub fn validate(&self) -> QueryResult<()> {
        for entity in self.entities.values() {
            if entity.primary_key.is_empty() {
                return Err(QueryError::Configuration(format!(
                    "{} has no primary key",
                    entity.name
                )));
            }
            for relation in &entity.relations {
                let target = self.target_of(relation)?;
                entity.single_key()?;
                target.single_key()?;
                if let Some(column) = relation.owner_join_column() {
                    entity.column_meta(column)?;
                }
                match &relation.kind {
                    RelationKind::OneToMany { inverse_column }
                    | RelationKind::OneToOne {
                        side: OneToOneSide::Inverse {
                            column: inverse_column,
                        },
                    } => {
                        target.column_meta(inverse_column)?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
