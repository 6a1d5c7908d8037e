pub mod container_recreate_request;
pub mod operation_job;
