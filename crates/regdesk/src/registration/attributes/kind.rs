use crate::registration::domain::{
    Attribute, AttributeType, BlockId, Event, Form, FormField, FormId,
};
use crate::registration::store::{BlockStore, CatalogStore, StoreError};

/// Handler an attribute's value is routed to, resolved once when a form is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Plain,
    Select,
    MultiSelect,
    File,
    Block { root: BlockId },
}

impl FieldKind {
    pub fn resolve<S>(attribute: &Attribute, store: &S) -> Result<Self, StoreError>
    where
        S: BlockStore + ?Sized,
    {
        let kind = match attribute.attribute_type {
            AttributeType::Text
            | AttributeType::LongText
            | AttributeType::Number
            | AttributeType::Date
            | AttributeType::Time
            | AttributeType::Datetime
            | AttributeType::Email
            | AttributeType::Phone
            | AttributeType::Color
            | AttributeType::Checkbox => FieldKind::Plain,
            AttributeType::SingleSelect => FieldKind::Select,
            AttributeType::MultiSelect => FieldKind::MultiSelect,
            AttributeType::File => FieldKind::File,
            AttributeType::Block => FieldKind::Block {
                root: store.root(attribute.id)?.id,
            },
        };
        Ok(kind)
    }
}

/// A form field joined with its attribute and resolved handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub attribute: Attribute,
    pub kind: FieldKind,
    pub required: bool,
    pub editable: bool,
    pub order: Option<i32>,
}

impl FieldSpec {
    /// Submissions may key a field by attribute id or by slug.
    pub fn matches_key(&self, key: &str) -> bool {
        key == self.attribute.slug || key == self.attribute.id.to_string()
    }
}

/// Form ready for dispatch: every declared attribute classified, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSchema {
    pub event: Event,
    pub form: Form,
    pub fields: Vec<FieldSpec>,
}

impl FormSchema {
    pub fn load<S>(store: &S, form_id: FormId) -> Result<Self, StoreError>
    where
        S: BlockStore + CatalogStore + ?Sized,
    {
        let form = store
            .form(form_id)?
            .ok_or_else(|| StoreError::not_found("form", form_id))?;
        let event = store
            .event(form.event_id)?
            .ok_or_else(|| StoreError::not_found("event", form.event_id))?;

        let mut fields = Vec::with_capacity(form.fields.len());
        for field in &form.fields {
            fields.push(Self::field_spec(store, field)?);
        }
        fields.sort_by_key(|spec| {
            (
                spec.order.or(spec.attribute.order).unwrap_or(i32::MAX),
                spec.attribute.id,
            )
        });

        Ok(Self {
            event,
            form,
            fields,
        })
    }

    fn field_spec<S>(store: &S, field: &FormField) -> Result<FieldSpec, StoreError>
    where
        S: BlockStore + CatalogStore + ?Sized,
    {
        let attribute = store
            .attribute(field.attribute_id)?
            .ok_or_else(|| StoreError::not_found("attribute", field.attribute_id))?;
        let kind = FieldKind::resolve(&attribute, store)?;
        Ok(FieldSpec {
            attribute,
            kind,
            required: field.required,
            editable: field.editable,
            order: field.order,
        })
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.matches_key(key))
    }
}
