use super::bundle::ImportBundle;
use super::importer::{EntityImporter, Problem};
use super::importers::importer_for;
use super::table_order::{EntityType, IMPORT_ORDER};
use super::ImportError;

/// One importer per entity type, held in execution order for a single call.
pub struct Registry {
    importers: Vec<Box<dyn EntityImporter>>,
}

impl Registry {
    /// Slice the bundle's payload per entity type and build the importers in
    /// [`IMPORT_ORDER`].
    pub fn instantiate(bundle: &ImportBundle) -> Result<Self, ImportError> {
        for key in bundle.unknown_data_keys() {
            tracing::debug!(target: "publish_import", event = "import_key_ignored", key = %key);
        }

        let mut importers = Vec::with_capacity(IMPORT_ORDER.len());
        for entity in IMPORT_ORDER {
            let rows = bundle.rows(entity)?;
            importers.push(importer_for(entity, rows));
        }
        Self::from_importers(importers)
    }

    pub(crate) fn from_importers(
        importers: Vec<Box<dyn EntityImporter>>,
    ) -> Result<Self, ImportError> {
        let registry = Self { importers };
        registry.verify_order()?;
        Ok(registry)
    }

    /// Every declared dependency must belong to an importer that runs strictly
    /// earlier.
    pub fn verify_order(&self) -> Result<(), ImportError> {
        for (index, importer) in self.importers.iter().enumerate() {
            let entity = importer.data_key_to_import();
            if self.importers[..index]
                .iter()
                .any(|earlier| earlier.data_key_to_import() == entity)
            {
                return Err(ImportError::DuplicateImporter(entity));
            }
            for dependency in importer.dependencies().all() {
                let ordered_before = self.importers[..index]
                    .iter()
                    .any(|earlier| earlier.data_key_to_import() == dependency);
                if !ordered_before {
                    return Err(ImportError::DependencyOrder { entity, dependency });
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.importers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }

    pub fn entities(&self) -> Vec<EntityType> {
        self.importers
            .iter()
            .map(|importer| importer.data_key_to_import())
            .collect()
    }

    pub fn get(&self, entity: EntityType) -> Option<&dyn EntityImporter> {
        self.importers
            .iter()
            .find(|importer| importer.data_key_to_import() == entity)
            .map(|importer| importer.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn EntityImporter> {
        self.importers.iter().map(|importer| importer.as_ref())
    }

    pub(crate) fn importers_mut(&mut self) -> &mut [Box<dyn EntityImporter>] {
        &mut self.importers
    }

    /// Problems of every importer, in registry order.
    pub fn problems(&self) -> Vec<Problem> {
        self.importers
            .iter()
            .flat_map(|importer| importer.problems().iter().cloned())
            .collect()
    }
}
