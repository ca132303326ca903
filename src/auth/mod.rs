pub mod action_token;
pub mod token_store;
