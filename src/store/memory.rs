// In-process store with no side effects - used by tests and for scratch planning

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{EntityStore, StoreError, StoreResult};
use crate::workflow::types::{
    EntityKind, NewTypeField, NewWorkflowType, TypeField, TypeKey, TypeMetadata, TypeScope,
    WorkflowEntity, WorkflowType,
};

#[derive(Debug, Default)]
struct MemoryState {
    types: BTreeMap<TypeKey, WorkflowType>,
    entities: BTreeMap<(EntityKind, i64), WorkflowEntity>,
    fields: BTreeMap<(EntityKind, i64), TypeField>,
    next_type_id: BTreeMap<EntityKind, i64>,
    next_entity_id: BTreeMap<EntityKind, i64>,
    next_field_id: BTreeMap<EntityKind, i64>,
}

impl MemoryState {
    fn allocate(counter: &mut BTreeMap<EntityKind, i64>, kind: EntityKind) -> i64 {
        let next = counter.entry(kind).or_insert(0);
        *next += 1;
        *next
    }

    fn entities_of(&mut self, key: TypeKey) -> impl Iterator<Item = &mut WorkflowEntity> {
        self.entities
            .values_mut()
            .filter(move |e| e.kind == key.kind && e.type_id == key.id)
    }

    fn add_field(&mut self, key: TypeKey, field: &NewTypeField) -> StoreResult<TypeField> {
        if self
            .fields
            .values()
            .any(|f| f.type_key == key && f.key == field.key)
        {
            // mirrors UNIQUE (type_id, key)
            return Err(StoreError::Conflict {
                reason: format!("field '{}' already exists on {key}", field.key),
            });
        }
        let id = Self::allocate(&mut self.next_field_id, key.kind);
        let record = TypeField {
            id,
            type_key: key,
            key: field.key.clone(),
            label: field.label.clone(),
            field_type: field.field_type,
            options: field.options.clone(),
            required: field.required,
            order: field.order,
        };
        self.fields.insert((key.kind, id), record.clone());
        Ok(record)
    }
}

/// `EntityStore` backed by ordered maps behind a tokio mutex.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    state: Mutex<MemoryState>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entities of a type, ordered by id.
    pub async fn entities_of_type(&self, key: TypeKey) -> Vec<WorkflowEntity> {
        let state = self.state.lock().await;
        state
            .entities
            .values()
            .filter(|e| e.kind == key.kind && e.type_id == key.id)
            .cloned()
            .collect()
    }

    pub async fn type_count(&self) -> usize {
        self.state.lock().await.types.len()
    }
}

fn apply_destination(entity: &mut WorkflowEntity, dest: &WorkflowType, new_status: &str) {
    entity.type_id = dest.key.id;
    entity.status = new_status.to_string();
    if entity.kind == EntityKind::Task {
        if let Some(team_id) = dest.scope.team_id() {
            entity.team_id = Some(team_id);
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_type(&self, key: TypeKey) -> StoreResult<Option<WorkflowType>> {
        Ok(self.state.lock().await.types.get(&key).cloned())
    }

    async fn find_type_by_slug(
        &self,
        kind: EntityKind,
        scope: TypeScope,
        slug: &str,
    ) -> StoreResult<Option<WorkflowType>> {
        let state = self.state.lock().await;
        Ok(state
            .types
            .values()
            .find(|t| t.key.kind == kind && t.scope == scope && t.slug == slug)
            .cloned())
    }

    async fn insert_type(&self, new_type: &NewWorkflowType) -> StoreResult<WorkflowType> {
        let mut state = self.state.lock().await;
        let id = MemoryState::allocate(&mut state.next_type_id, new_type.kind);
        let record = WorkflowType {
            key: TypeKey { kind: new_type.kind, id },
            name: new_type.name.clone(),
            slug: new_type.slug.clone(),
            description: new_type.description.clone(),
            color: new_type.color.clone(),
            scope: new_type.scope,
            workflow: new_type.workflow.clone(),
            version: 1,
        };
        state.types.insert(record.key, record.clone());
        for field in &new_type.fields {
            state.add_field(record.key, field)?;
        }
        Ok(record)
    }

    async fn delete_type(&self, key: TypeKey) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state.entities_of(key).next().is_some() {
            // mirrors the RESTRICT foreign key of the relational schema
            return Err(StoreError::Conflict {
                reason: format!("{key} is still referenced"),
            });
        }
        state.fields.retain(|_, f| f.type_key != key);
        Ok(state.types.remove(&key).is_some())
    }

    async fn set_metadata(&self, key: TypeKey, metadata: &TypeMetadata) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match state.types.get_mut(&key) {
            Some(record) => {
                record.name = metadata.name.clone();
                record.description = metadata.description.clone();
                record.color = metadata.color.clone();
                Ok(())
            }
            None => Err(StoreError::Conflict {
                reason: format!("{key} disappeared"),
            }),
        }
    }

    async fn list_fields(&self, key: TypeKey) -> StoreResult<Vec<TypeField>> {
        let state = self.state.lock().await;
        let mut fields: Vec<TypeField> = state
            .fields
            .values()
            .filter(|f| f.type_key == key)
            .cloned()
            .collect();
        fields.sort_by_key(|f| (f.order, f.id));
        Ok(fields)
    }

    async fn insert_field(&self, key: TypeKey, field: &NewTypeField) -> StoreResult<TypeField> {
        let mut state = self.state.lock().await;
        if !state.types.contains_key(&key) {
            return Err(StoreError::Conflict {
                reason: format!("{key} disappeared"),
            });
        }
        state.add_field(key, field)
    }

    async fn find_field(&self, key: TypeKey, field_id: i64) -> StoreResult<Option<TypeField>> {
        let state = self.state.lock().await;
        Ok(state
            .fields
            .get(&(key.kind, field_id))
            .filter(|f| f.type_key == key)
            .cloned())
    }

    async fn save_field(&self, field: &TypeField) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match state.fields.get_mut(&(field.type_key.kind, field.id)) {
            Some(record) if record.type_key == field.type_key => {
                *record = field.clone();
                Ok(())
            }
            _ => Err(StoreError::Conflict {
                reason: format!("field #{} disappeared", field.id),
            }),
        }
    }

    async fn delete_field(&self, key: TypeKey, field_id: i64) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let belongs = state
            .fields
            .get(&(key.kind, field_id))
            .is_some_and(|f| f.type_key == key);
        if belongs {
            state.fields.remove(&(key.kind, field_id));
        }
        Ok(belongs)
    }

    async fn set_workflow(&self, key: TypeKey, workflow: &[String], version: i64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match state.types.get_mut(&key) {
            Some(record) => {
                record.workflow = workflow.to_vec();
                record.version = version;
                Ok(())
            }
            None => Err(StoreError::Conflict {
                reason: format!("{key} disappeared"),
            }),
        }
    }

    async fn count_by_type_and_status(&self, key: TypeKey, status: &str) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.entities_of(key).filter(|e| e.status == status).count() as u64)
    }

    async fn count_by_type(&self, key: TypeKey) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.entities_of(key).count() as u64)
    }

    async fn bulk_update_status(
        &self,
        key: TypeKey,
        old_status: &str,
        new_status: &str,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for entity in state.entities_of(key).filter(|e| e.status == old_status) {
            entity.status = new_status.to_string();
            affected += 1;
        }
        Ok(affected)
    }

    async fn reassign_status(
        &self,
        source: TypeKey,
        dest: &WorkflowType,
        old_status: &str,
        new_status: &str,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for entity in state.entities_of(source).filter(|e| e.status == old_status) {
            apply_destination(entity, dest, new_status);
            affected += 1;
        }
        Ok(affected)
    }

    async fn reassign_remaining(
        &self,
        source: TypeKey,
        dest: &WorkflowType,
        excluded: &[String],
        new_status: &str,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for entity in state
            .entities_of(source)
            .filter(|e| !excluded.contains(&e.status))
        {
            apply_destination(entity, dest, new_status);
            affected += 1;
        }
        Ok(affected)
    }

    async fn insert_entity(
        &self,
        ty: &WorkflowType,
        title: &str,
        status: &str,
    ) -> StoreResult<WorkflowEntity> {
        let mut state = self.state.lock().await;
        let id = MemoryState::allocate(&mut state.next_entity_id, ty.kind());
        let entity = WorkflowEntity {
            id,
            kind: ty.kind(),
            type_id: ty.key.id,
            team_id: ty.scope.team_id(),
            title: title.to_string(),
            status: status.to_string(),
        };
        state.entities.insert((entity.kind, id), entity.clone());
        Ok(entity)
    }

    async fn find_entity(&self, kind: EntityKind, id: i64) -> StoreResult<Option<WorkflowEntity>> {
        Ok(self.state.lock().await.entities.get(&(kind, id)).cloned())
    }

    async fn update_entity_status(&self, kind: EntityKind, id: i64, status: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match state.entities.get_mut(&(kind, id)) {
            Some(entity) => {
                entity.status = status.to_string();
                Ok(())
            }
            None => Err(StoreError::Conflict {
                reason: format!("{kind} #{id} disappeared"),
            }),
        }
    }
}
