//! Integration tests module loader

mod integration {
    pub mod backfill_resume;
    pub mod upload_pipeline;
    pub mod volume_scenarios;
}
