use crate::{block::entities::BlockEntityRegistry, entity::EntityRegistry};

/// Everything the chunk codec needs to turn records back into live objects. Built once, then
/// shared read only.
#[derive(Default)]
pub struct Registries {
    pub entities: EntityRegistry,
    pub block_entities: BlockEntityRegistry,
}

impl Registries {
    pub fn new(entities: EntityRegistry, block_entities: BlockEntityRegistry) -> Self {
        Self {
            entities,
            block_entities,
        }
    }
}
