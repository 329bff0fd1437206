use std::{any::Any, collections::HashMap};

use ember_nbt::data_view::DataView;
use ember_util::math::vector3::Vector3;

use crate::entity::EntityError;

/// Extra state attached to a single block, such as the contents of a chest.
pub trait BlockEntity: Send + Sync {
    fn identifier(&self) -> &str;

    /// Writes every field except `id` and the coordinates.
    fn write_nbt(&self, nbt: &mut DataView) -> Result<(), EntityError>;

    fn read_nbt(&mut self, nbt: &DataView) -> Result<(), EntityError>;

    /// The full record, stored with world coordinates.
    fn write_record(&self, position: Vector3<i32>) -> Result<DataView, EntityError> {
        let mut nbt = DataView::new();
        nbt.set("id", self.identifier());
        nbt.set("x", position.x);
        nbt.set("y", position.y);
        nbt.set("z", position.z);
        self.write_nbt(&mut nbt)?;
        Ok(nbt)
    }

    fn as_any(&self) -> &dyn Any;
}

/// Reads the world coordinates of a block entity record.
pub fn record_block_position(record: &DataView) -> Option<Vector3<i32>> {
    Some(Vector3::new(
        record.get_int("x")?,
        record.get_int("y")?,
        record.get_int("z")?,
    ))
}

pub type BlockEntityFactory = Box<dyn Fn() -> Box<dyn BlockEntity> + Send + Sync>;

/// Block entity ids, their constructors, and which block ids carry one.
#[derive(Default)]
pub struct BlockEntityRegistry {
    factories: HashMap<String, BlockEntityFactory>,
    by_block: HashMap<u16, String>,
}

impl BlockEntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: &str,
        factory: impl Fn() -> Box<dyn BlockEntity> + Send + Sync + 'static,
    ) {
        if self
            .factories
            .insert(id.to_string(), Box::new(factory))
            .is_some()
        {
            log::warn!("Block entity type {id} was registered twice, keeping the last one");
        }
    }

    /// Registers `id` as a [`StoredBlockEntity`], which keeps its record as is.
    pub fn register_stored(&mut self, id: &str) {
        let owned = id.to_string();
        self.register(id, move || Box::new(StoredBlockEntity::new(owned.clone())));
    }

    /// Every block with `block_id` gets a block entity of type `id` when its chunk is set up.
    pub fn bind_block(&mut self, block_id: u16, id: &str) {
        self.by_block.insert(block_id, id.to_string());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn block_entity_id(&self, block_id: u16) -> Option<&str> {
        self.by_block.get(&block_id).map(String::as_str)
    }

    pub fn has_bindings(&self) -> bool {
        !self.by_block.is_empty()
    }

    pub fn create(&self, id: &str) -> Option<Box<dyn BlockEntity>> {
        self.factories.get(id).map(|factory| factory())
    }

    /// A fresh block entity for a block, if that block carries one.
    pub fn create_for_block(&self, block_id: u16) -> Option<Box<dyn BlockEntity>> {
        let id = self.block_entity_id(block_id)?;
        let block_entity = self.create(id);
        if block_entity.is_none() {
            log::warn!("Block {block_id} is bound to {id}, which is not registered");
        }
        block_entity
    }
}

/// A block entity without behavior that carries every field of its record through a load and
/// save.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredBlockEntity {
    id: String,
    fields: DataView,
}

impl StoredBlockEntity {
    pub fn new(id: String) -> Self {
        Self {
            id,
            fields: DataView::new(),
        }
    }

    pub fn fields(&self) -> &DataView {
        &self.fields
    }
}

impl BlockEntity for StoredBlockEntity {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn write_nbt(&self, nbt: &mut DataView) -> Result<(), EntityError> {
        nbt.extend(self.fields.clone());
        Ok(())
    }

    fn read_nbt(&mut self, nbt: &DataView) -> Result<(), EntityError> {
        self.fields = nbt
            .iter()
            .filter(|(key, _)| !matches!(*key, "id" | "x" | "y" | "z"))
            .map(|(key, tag)| (key.to_string(), tag.clone()))
            .collect();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
