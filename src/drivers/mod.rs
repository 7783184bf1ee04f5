pub mod crsf;

#[cfg(feature = "firmware")]
pub mod dshot;
#[cfg(feature = "firmware")]
pub mod icm42688;
