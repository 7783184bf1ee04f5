pub mod core_tasks;
pub mod crsf_task;
pub mod imu_task;
pub mod telemetry_task;
