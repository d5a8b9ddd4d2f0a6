use std::fmt;

use super::expr::Expr;

/// Declared column type. Only used for coercion (CAST targets, defaults),
/// values themselves are dynamically typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,
    Float,
    Text,
    Boolean,
    Json,
    /// A type the engine does not coerce to. Values pass through unchanged.
    Other(String),
}

impl DataType {
    /// Parse a type name as written in SQL (`INTEGER`, `varchar`,
    /// `jsonb`...).
    pub fn from_sql_name(name: &str) -> Self {
        let lower = name.trim().to_ascii_lowercase();
        let base = lower.split('(').next().unwrap_or("").trim();
        match base {
            "int" | "integer" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "tinyint"
            | "mediumint" | "signed" | "unsigned" | "serial" | "bigserial" => DataType::Int,
            "float" | "float4" | "float8" | "real" | "double" | "double precision" | "numeric"
            | "decimal" => DataType::Float,
            "text" | "varchar" | "char" | "character" | "character varying" | "string" | "uuid" => {
                DataType::Text
            }
            "bool" | "boolean" => DataType::Boolean,
            "json" | "jsonb" => DataType::Json,
            _ => DataType::Other(name.to_string()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "INT"),
            Self::Float => write!(f, "DOUBLE"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Json => write!(f, "JSON"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Resolved schema of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSchema {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    /// `DEFAULT <expr>`, evaluated once per inserted row.
    pub default: Option<Expr>,
    /// Identity/auto-increment column. The store assigns the value when the
    /// inserted record leaves it NULL.
    pub identity: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        ColumnSchema {
            name: name.into(),
            datatype,
            nullable: true,
            default: None,
            identity: false,
        }
    }

    pub fn with_default(mut self, default: Expr) -> Self {
        self.default = Some(default);
        self
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Resolved schema for a relation referenced by a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableSchema {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    /// Primary key columns. Empty if the table has no key, in which case the
    /// whole record is the key.
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        TableSchema {
            schema: None,
            name: name.into(),
            columns,
            primary_key: Vec::new(),
        }
    }

    pub fn with_primary_key<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = cols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Key columns, falling back to every column for key-less tables.
    pub fn key_columns(&self) -> Vec<String> {
        if self.primary_key.is_empty() {
            self.column_names()
        } else {
            self.primary_key.clone()
        }
    }

    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Check if this schema is the one referenced by `name`.
    pub fn matches(&self, name: &ObjectName) -> bool {
        if self.name != name.name {
            return false;
        }
        match (&name.schema, &self.schema) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        }
    }
}

/// Possibly schema-qualified relation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName {
    pub schema: Option<String>,
    pub name: String,
}

impl ObjectName {
    pub fn new(name: impl Into<String>) -> Self {
        ObjectName {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        ObjectName {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for ObjectName {
    fn from(value: &str) -> Self {
        match value.split_once('.') {
            Some((schema, name)) => ObjectName::qualified(schema, name),
            None => ObjectName::new(value),
        }
    }
}
