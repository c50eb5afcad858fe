use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::kind::{FieldKind, FieldSpec, FormSchema};
use crate::registration::blocks::CapacityOracle;
use crate::registration::domain::{
    AttributeId, BlockId, Participant, RawValue, ResolvedKind, ResolvedValue, Submission, Upload,
};
use crate::registration::enrollment::collaborators::{FileStorage, StorageKey};
use crate::registration::error::{EnrollmentError, MissingField};
use crate::registration::store::{BlockStore, OccupancyStore};

/// Values resolved from one submission, in form order, ready for a single commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatched {
    pub values: Vec<ResolvedValue>,
}

impl Dispatched {
    /// Storage keys written while resolving file fields.
    pub fn stored_keys(&self) -> Vec<StorageKey> {
        self.values
            .iter()
            .filter(|value| matches!(value.kind, ResolvedKind::File))
            .map(|value| StorageKey(value.value.clone()))
            .collect()
    }

    pub fn admissions(&self) -> impl Iterator<Item = (AttributeId, BlockId)> + '_ {
        self.values
            .iter()
            .filter_map(|value| value.admission().map(|block| (value.attribute_id, block)))
    }
}

enum Pending {
    Ready(ResolvedValue),
    Upload(AttributeId, Upload),
}

/// Routes each submitted field to the handler of its attribute type.
#[derive(Debug)]
pub struct AttributeDispatcher<S, F> {
    store: Arc<S>,
    oracle: CapacityOracle<S>,
    files: Arc<F>,
}

impl<S, F> AttributeDispatcher<S, F>
where
    S: BlockStore + OccupancyStore,
    F: FileStorage,
{
    pub fn new(store: Arc<S>, files: Arc<F>) -> Self {
        let oracle = CapacityOracle::new(Arc::clone(&store));
        Self {
            store,
            oracle,
            files,
        }
    }

    /// Resolve a submission against a loaded form.
    ///
    /// Fields not declared on the form are dropped. Block admissions are checked before
    /// any upload is stored, and uploads already stored are discarded if a later one
    /// fails, so a rejected submission leaves nothing behind.
    pub fn dispatch(
        &self,
        schema: &FormSchema,
        submission: Submission,
        holder: Option<&Participant>,
    ) -> Result<Dispatched, EnrollmentError> {
        let mut present: BTreeMap<AttributeId, RawValue> = BTreeMap::new();
        for (key, raw) in submission.fields {
            match schema.field(&key) {
                Some(spec) => {
                    present.insert(spec.attribute.id, raw);
                }
                None => debug!(form_id = %schema.form.id, %key, "dropping undeclared field"),
            }
        }

        let missing: Vec<MissingField> = schema
            .fields
            .iter()
            .filter(|spec| spec.required)
            .filter(|spec| {
                present
                    .get(&spec.attribute.id)
                    .map_or(true, RawValue::is_blank)
            })
            .map(|spec| MissingField {
                attribute_id: spec.attribute.id,
                name: spec.attribute.name.clone(),
                slug: spec.attribute.slug.clone(),
            })
            .collect();
        if !missing.is_empty() {
            return Err(EnrollmentError::MissingRequiredFields(missing));
        }

        let mut pending = Vec::with_capacity(present.len());
        for spec in &schema.fields {
            let Some(raw) = present.remove(&spec.attribute.id) else {
                continue;
            };
            if let Some(holder) = holder {
                if !spec.editable && holder.values.contains_key(&spec.attribute.id) {
                    debug!(attribute_id = %spec.attribute.id, "ignoring locked field");
                    continue;
                }
            }
            if let Some(item) = self.classify(spec, raw, holder)? {
                pending.push(item);
            }
        }

        self.store_uploads(pending)
    }

    fn classify(
        &self,
        spec: &FieldSpec,
        raw: RawValue,
        holder: Option<&Participant>,
    ) -> Result<Option<Pending>, EnrollmentError> {
        let attribute_id = spec.attribute.id;
        let field = spec.attribute.slug.as_str();
        let plain = |value: String| {
            Some(Pending::Ready(ResolvedValue {
                attribute_id,
                value,
                kind: ResolvedKind::Plain,
            }))
        };

        match (spec.kind, raw) {
            (FieldKind::Block { .. } | FieldKind::File, raw) if raw.is_blank() => Ok(None),
            (FieldKind::Block { root }, RawValue::Text(raw)) => {
                let block_id = self.admit(spec, root, &raw, holder)?;
                Ok(Some(Pending::Ready(ResolvedValue {
                    attribute_id,
                    value: block_id.as_value(),
                    kind: ResolvedKind::Block(block_id),
                })))
            }
            (FieldKind::Block { .. }, _) => Err(EnrollmentError::invalid(field, "expected a block id")),
            (FieldKind::File, RawValue::Upload(upload)) => {
                Ok(Some(Pending::Upload(attribute_id, upload)))
            }
            (FieldKind::File, _) => Err(EnrollmentError::invalid(field, "expected a file upload")),
            (FieldKind::Plain | FieldKind::Select, RawValue::Text(text)) => Ok(plain(text)),
            (FieldKind::Select, RawValue::Choices(mut choices)) if choices.len() == 1 => {
                Ok(plain(choices.remove(0)))
            }
            (FieldKind::MultiSelect, RawValue::Choices(choices)) => Ok(plain(encode(&choices))),
            (FieldKind::MultiSelect, RawValue::Text(text)) => Ok(plain(encode(&[text]))),
            (FieldKind::Select, RawValue::Choices(_)) => {
                Err(EnrollmentError::invalid(field, "expected a single choice"))
            }
            (FieldKind::Plain, RawValue::Choices(_))
            | (FieldKind::Plain | FieldKind::Select | FieldKind::MultiSelect, RawValue::Upload(_)) => {
                Err(EnrollmentError::invalid(field, "unexpected value shape"))
            }
        }
    }

    fn admit(
        &self,
        spec: &FieldSpec,
        root: BlockId,
        raw: &str,
        holder: Option<&Participant>,
    ) -> Result<BlockId, EnrollmentError> {
        let block_id = BlockId::parse(raw)
            .ok_or_else(|| EnrollmentError::invalid(&spec.attribute.slug, "expected a block id"))?;
        if block_id == root {
            return Err(EnrollmentError::invalid(
                &spec.attribute.slug,
                "the root block is not selectable",
            ));
        }

        let block = self
            .store
            .block(block_id)?
            .filter(|block| block.attribute_id == spec.attribute.id)
            .ok_or_else(|| EnrollmentError::not_found("block", block_id))?;

        let holder_id = holder.map(|participant| participant.id);
        if !self.oracle.can_admit_for(block.id, holder_id)? {
            info!(
                attribute_id = %spec.attribute.id,
                %block_id,
                capacity = ?block.capacity,
                "admission refused, block is full"
            );
            return Err(EnrollmentError::BlockFull {
                attribute_id: spec.attribute.id,
                block_id,
            });
        }
        Ok(block_id)
    }

    fn store_uploads(&self, pending: Vec<Pending>) -> Result<Dispatched, EnrollmentError> {
        let mut values = Vec::with_capacity(pending.len());
        let mut stored = Vec::new();

        for item in pending {
            match item {
                Pending::Ready(value) => values.push(value),
                Pending::Upload(attribute_id, upload) => match self.files.store(&upload) {
                    Ok(key) => {
                        stored.push(key.clone());
                        values.push(ResolvedValue {
                            attribute_id,
                            value: key.0,
                            kind: ResolvedKind::File,
                        });
                    }
                    Err(err) => {
                        warn!(%attribute_id, file_name = %upload.file_name, error = %err, "upload failed");
                        self.discard(&stored);
                        return Err(EnrollmentError::Storage(err));
                    }
                },
            }
        }

        Ok(Dispatched { values })
    }

    /// Best-effort removal of artifacts from a rejected submission.
    pub fn discard(&self, keys: &[StorageKey]) {
        for key in keys {
            if let Err(err) = self.files.discard(key) {
                warn!(%key, error = %err, "failed to discard orphaned upload");
            }
        }
    }
}

fn encode(choices: &[String]) -> String {
    serde_json::to_string(choices).unwrap_or_else(|_| String::from("[]"))
}
