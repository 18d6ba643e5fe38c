//! The metadata descriptor provider.
//!
//! Entity metadata reaches the builder as plain descriptor values, never
//! through runtime reflection. Whatever produces them (a derive macro, a
//! configuration file, a test fixture), the builder only sees this surface.

/// SQL-mappable primitive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Guid,
    String,
    I16,
    I32,
    I64,
    F64,
    Decimal,
    Bool,
    DateTime,
    Bytes,
}

impl ScalarKind {
    /// The default SQL type for the kind, before annotations refine it.
    pub fn default_sql_type(self) -> &'static str {
        match self {
            ScalarKind::Guid => "uniqueidentifier",
            ScalarKind::String => "nvarchar(max)",
            ScalarKind::I16 => "smallint",
            ScalarKind::I32 => "int",
            ScalarKind::I64 => "bigint",
            ScalarKind::F64 => "float",
            ScalarKind::Decimal => "decimal(18,2)",
            ScalarKind::Bool => "bit",
            ScalarKind::DateTime => "datetime2",
            ScalarKind::Bytes => "varbinary(max)",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ScalarKind::I16 | ScalarKind::I32 | ScalarKind::I64)
    }
}

/// What a member is, structurally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberShape {
    /// A column-mappable primitive.
    Scalar(ScalarKind),
    /// A single navigation to another entity type.
    Reference(String),
    /// A sequence navigation to another entity type.
    Collection(String),
}

/// A declarative annotation on a member.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    Key,
    Identity,
    NotMapped,
    Required,
    Unique,
    MaxLength(u32),
    StringLength { min: Option<u32>, max: u32 },
    Range { min: f64, max: f64 },
    RegularExpression(String),
    /// Marks the member as the foreign key backing the named navigation
    /// member.
    ForeignKey(String),
    /// Explicit SQL type override.
    ColumnType(String),
    DefaultValue(String),
    Description(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberDescriptor {
    pub name: String,
    pub shape: MemberShape,
    /// Whether the member's declared type admits null.
    pub optional: bool,
    pub annotations: Vec<Annotation>,
}

impl MemberDescriptor {
    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        MemberDescriptor {
            name: name.into(),
            shape: MemberShape::Scalar(kind),
            optional: false,
            annotations: Vec::new(),
        }
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        MemberDescriptor {
            name: name.into(),
            shape: MemberShape::Reference(target.into()),
            optional: true,
            annotations: Vec::new(),
        }
    }

    pub fn collection(name: impl Into<String>, target: impl Into<String>) -> Self {
        MemberDescriptor {
            name: name.into(),
            shape: MemberShape::Collection(target.into()),
            optional: true,
            annotations: Vec::new(),
        }
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self.shape, MemberShape::Reference(_) | MemberShape::Collection(_))
    }

    /// The navigation target type name, when the member is a navigation.
    pub fn navigation_target(&self) -> Option<&str> {
        match &self.shape {
            MemberShape::Reference(t) | MemberShape::Collection(t) => Some(t.as_str()),
            MemberShape::Scalar(_) => None,
        }
    }

    pub fn has(&self, probe: impl Fn(&Annotation) -> bool) -> bool {
        self.annotations.iter().any(probe)
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn key(self) -> Self {
        self.annotated(Annotation::Key)
    }

    pub fn identity(self) -> Self {
        self.annotated(Annotation::Identity)
    }

    pub fn not_mapped(self) -> Self {
        self.annotated(Annotation::NotMapped)
    }

    pub fn required(self) -> Self {
        self.annotated(Annotation::Required)
    }

    pub fn unique(self) -> Self {
        self.annotated(Annotation::Unique)
    }

    pub fn max_length(self, max: u32) -> Self {
        self.annotated(Annotation::MaxLength(max))
    }

    pub fn string_length(self, min: Option<u32>, max: u32) -> Self {
        self.annotated(Annotation::StringLength { min, max })
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.annotated(Annotation::Range { min, max })
    }

    pub fn pattern(self, regex: impl Into<String>) -> Self {
        self.annotated(Annotation::RegularExpression(regex.into()))
    }

    pub fn foreign_key(self, navigation: impl Into<String>) -> Self {
        self.annotated(Annotation::ForeignKey(navigation.into()))
    }

    pub fn column_type(self, sql_type: impl Into<String>) -> Self {
        self.annotated(Annotation::ColumnType(sql_type.into()))
    }

    pub fn default_value(self, expression: impl Into<String>) -> Self {
        self.annotated(Annotation::DefaultValue(expression.into()))
    }

    pub fn description(self, text: impl Into<String>) -> Self {
        self.annotated(Annotation::Description(text.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    /// The descriptor type name, e.g. `User`. Also the default table name.
    pub type_name: String,
    /// Table name override.
    pub table_name: Option<String>,
    /// Schema override; the builder's default applies otherwise.
    pub schema: Option<String>,
    pub members: Vec<MemberDescriptor>,
    pub description: Option<String>,
}

impl EntityDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        EntityDescriptor {
            type_name: type_name.into(),
            table_name: None,
            schema: None,
            members: Vec::new(),
            description: None,
        }
    }

    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn member(mut self, member: MemberDescriptor) -> Self {
        self.members.push(member);
        self
    }

    pub fn described(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn effective_table_name(&self) -> &str {
        self.table_name.as_deref().unwrap_or(&self.type_name)
    }

    pub fn find_member(&self, name: &str) -> Option<&MemberDescriptor> {
        self.members
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// Single-reference navigation members.
    pub fn reference_members(&self) -> impl Iterator<Item = &MemberDescriptor> {
        self.members
            .iter()
            .filter(|m| matches!(m.shape, MemberShape::Reference(_)))
    }

    /// Sequence navigation members.
    pub fn collection_members(&self) -> impl Iterator<Item = &MemberDescriptor> {
        self.members
            .iter()
            .filter(|m| matches!(m.shape, MemberShape::Collection(_)))
    }
}

/// Anything that can enumerate entity descriptors for a migration run.
pub trait DescriptorSource {
    fn entity_descriptors(&self) -> Vec<EntityDescriptor>;
}

impl DescriptorSource for Vec<EntityDescriptor> {
    fn entity_descriptors(&self) -> Vec<EntityDescriptor> {
        self.clone()
    }
}

impl DescriptorSource for &[EntityDescriptor] {
    fn entity_descriptors(&self) -> Vec<EntityDescriptor> {
        self.to_vec()
    }
}
