mod models;

pub use models::{
    AttributeFilter, ConfigureRequest, ContentId, Policy, PolicyDefinition, PolicyUpdate,
    Recurrence, RetentionWindow,
};
