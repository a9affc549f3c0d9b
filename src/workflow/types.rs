use serde::{Deserialize, Serialize};
use std::fmt;

/// Which family of work items a type governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Project,
    Task,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Task => "task",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Project => "projects",
            EntityKind::Task => "tasks",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "project" | "projects" => Ok(EntityKind::Project),
            "task" | "tasks" => Ok(EntityKind::Task),
            other => Err(format!("unknown entity kind '{other}' (expected project or task)")),
        }
    }
}

/// Address of a workflow type. Project and task types live in separate id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl TypeKey {
    pub fn project(id: i64) -> Self {
        Self { kind: EntityKind::Project, id }
    }

    pub fn task(id: i64) -> Self {
        Self { kind: EntityKind::Task, id }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} type #{}", self.kind, self.id)
    }
}

/// Owning scope of a type. Only used as a partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeScope {
    Global,
    Team(i64),
}

impl TypeScope {
    pub fn team_id(&self) -> Option<i64> {
        match self {
            TypeScope::Global => None,
            TypeScope::Team(id) => Some(*id),
        }
    }
}

/// A project type or task type together with its ordered workflow.
///
/// The record is a plain value: callers load it, hand it to the engine and
/// receive the updated record back once a plan has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowType {
    pub key: TypeKey,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub scope: TypeScope,
    pub workflow: Vec<String>,
    pub version: i64,
}

impl WorkflowType {
    pub fn kind(&self) -> EntityKind {
        self.key.kind
    }

    pub fn has_status(&self, status: &str) -> bool {
        self.workflow.iter().any(|s| s == status)
    }

    pub fn metadata(&self) -> TypeMetadata {
        TypeMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
            color: self.color.clone(),
        }
    }
}

/// Input for creating a type. `fields` are created together with the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWorkflowType {
    pub kind: EntityKind,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub scope: TypeScope,
    pub workflow: Vec<String>,
    #[serde(default)]
    pub fields: Vec<NewTypeField>,
}

/// Descriptive attributes of a type. None of them affect the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMetadata {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

/// Partial metadata edit. An empty `description` or `color` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMetadataUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

impl TypeMetadataUpdate {
    pub fn apply_to(&self, current: &TypeMetadata) -> TypeMetadata {
        fn clearable(update: &Option<String>, current: &Option<String>) -> Option<String> {
            match update.as_deref() {
                Some("") => None,
                Some(value) => Some(value.to_string()),
                None => current.clone(),
            }
        }

        TypeMetadata {
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            description: clearable(&self.description, &current.description),
            color: clearable(&self.color, &current.color),
        }
    }
}

/// Value kind of a custom field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Select,
    Multiselect,
    Url,
    Date,
    Checkbox,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Number => "number",
            FieldType::Select => "select",
            FieldType::Multiselect => "multiselect",
            FieldType::Url => "url",
            FieldType::Date => "date",
            FieldType::Checkbox => "checkbox",
        }
    }

    /// Select-style fields pick from a fixed option list.
    pub fn has_options(&self) -> bool {
        matches!(self, FieldType::Select | FieldType::Multiselect)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(FieldType::Text),
            "textarea" => Ok(FieldType::Textarea),
            "number" => Ok(FieldType::Number),
            "select" => Ok(FieldType::Select),
            "multiselect" => Ok(FieldType::Multiselect),
            "url" => Ok(FieldType::Url),
            "date" => Ok(FieldType::Date),
            "checkbox" => Ok(FieldType::Checkbox),
            other => Err(format!("unknown field type '{other}'")),
        }
    }
}

/// Custom field definition attached to a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeField {
    pub id: i64,
    pub type_key: TypeKey,
    pub key: String,
    pub label: String,
    pub field_type: FieldType,
    pub options: Option<Vec<String>>,
    pub required: bool,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTypeField {
    pub key: String,
    pub label: String,
    pub field_type: FieldType,
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub order: i64,
}

/// Partial field edit. The key and field type are fixed once created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFieldUpdate {
    pub label: Option<String>,
    pub options: Option<Vec<String>>,
    pub required: Option<bool>,
    pub order: Option<i64>,
}

impl TypeFieldUpdate {
    pub fn apply_to(&self, field: &TypeField) -> TypeField {
        TypeField {
            label: self.label.clone().unwrap_or_else(|| field.label.clone()),
            options: self.options.clone().or_else(|| field.options.clone()),
            required: self.required.unwrap_or(field.required),
            order: self.order.unwrap_or(field.order),
            ..field.clone()
        }
    }
}

/// A project or task as seen by the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEntity {
    pub id: i64,
    pub kind: EntityKind,
    pub type_id: i64,
    pub team_id: Option<i64>,
    pub title: String,
    pub status: String,
}

impl WorkflowEntity {
    pub fn type_key(&self) -> TypeKey {
        TypeKey { kind: self.kind, id: self.type_id }
    }
}

/// One admin-declared `old -> new` status pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusMapping {
    pub old_status: String,
    pub new_status: String,
}

impl StatusMapping {
    pub fn new(old_status: impl Into<String>, new_status: impl Into<String>) -> Self {
        Self {
            old_status: old_status.into(),
            new_status: new_status.into(),
        }
    }
}

impl std::str::FromStr for StatusMapping {
    type Err = String;

    /// Parses `OLD=NEW`. Whitespace is significant; status names are opaque.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((old, new)) if !old.is_empty() && !new.is_empty() => Ok(StatusMapping::new(old, new)),
            _ => Err(format!("invalid status mapping '{s}' (expected OLD=NEW)")),
        }
    }
}

/// Mapping from old status to new status for a single operation.
///
/// Keys keep the position of their first declaration; a repeated key takes
/// the value of its last declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMap {
    entries: Vec<(String, String)>,
}

impl StatusMap {
    pub fn from_mappings(mappings: &[StatusMapping]) -> Self {
        let mut map = StatusMap::default();
        for m in mappings {
            map.insert(m.old_status.clone(), m.new_status.clone());
        }
        map
    }

    pub fn insert(&mut self, old_status: String, new_status: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == old_status) {
            Some(entry) => entry.1 = new_status,
            None => self.entries.push((old_status, new_status)),
        }
    }

    pub fn get(&self, old_status: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == old_status)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, old_status: &str) -> bool {
        self.get(old_status).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_map_last_write_wins() {
        let map = StatusMap::from_mappings(&[
            StatusMapping::new("Doing", "Backlog"),
            StatusMapping::new("Review", "Done"),
            StatusMapping::new("Doing", "InProgress"),
        ]);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("Doing"), Some("InProgress"));
        // first declaration keeps its position
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["Doing", "Review"]);
    }

    #[test]
    fn test_status_map_is_case_sensitive() {
        let map = StatusMap::from_mappings(&[StatusMapping::new("doing", "Done")]);
        assert!(map.contains_key("doing"));
        assert!(!map.contains_key("Doing"));
    }

    #[test]
    fn test_status_mapping_parse() {
        let m: StatusMapping = "Doing=In Progress".parse().unwrap();
        assert_eq!(m, StatusMapping::new("Doing", "In Progress"));

        assert!("Doing".parse::<StatusMapping>().is_err());
        assert!("=Done".parse::<StatusMapping>().is_err());
        assert!("Doing=".parse::<StatusMapping>().is_err());
    }

    #[test]
    fn test_metadata_update_clears_with_empty_string() {
        let current = TypeMetadata {
            name: "Delivery".to_string(),
            description: Some("Client work".to_string()),
            color: Some("#ff0000".to_string()),
        };
        let update = TypeMetadataUpdate {
            name: None,
            description: Some(String::new()),
            color: Some("#00ff00".to_string()),
        };

        let merged = update.apply_to(&current);
        assert_eq!(merged.name, "Delivery");
        assert_eq!(merged.description, None);
        assert_eq!(merged.color.as_deref(), Some("#00ff00"));
    }

    #[test]
    fn test_field_type_parse() {
        assert_eq!("Multiselect".parse::<FieldType>().unwrap(), FieldType::Multiselect);
        assert!(FieldType::Select.has_options());
        assert!(!FieldType::Date.has_options());
        assert!("color".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("Project".parse::<EntityKind>().unwrap(), EntityKind::Project);
        assert_eq!("tasks".parse::<EntityKind>().unwrap(), EntityKind::Task);
        assert!("release".parse::<EntityKind>().is_err());
    }
}
