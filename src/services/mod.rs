pub mod broker_service;
pub mod cors_service;
pub mod credential_service;
pub mod file_access;
pub mod file_repository;
pub mod key_allocator;
pub mod key_cache;
pub mod object_store;
pub mod path_migration;
pub mod policy_builder;
pub mod settings_service;
pub mod storage_paths;
pub mod token_service;
pub mod upload_finalizer;
pub mod validators;

#[cfg(test)]
pub mod test_support;
