pub use crate::collaborators::*;
pub use crate::types::*;
pub use crate::validator::{
    MAX_DESCRIPTION_LEN, MAX_FORM_ITEMS, MAX_HEADERS, MAX_PROXY_LEN, MAX_TITLE_LEN, MAX_TOKEN_LEN,
    MAX_URL_LEN, MIN_TOKEN_LEN, TaskConfigValidator, ValidationError, derive_file_name,
};

pub use taskgate_fs::ValidationPolicy;

mod collaborators;
mod types;
mod validator;
