use std::{ffi::c_void, mem};

use metal::{Buffer, CompileOptions, ComputePipelineState, Device, Library, MTLResourceOptions};

use super::super::DeviceError;

pub(super) fn compile_library(device: &Device, source: &str) -> Result<Library, DeviceError> {
    device
        .new_library_with_source(source, &CompileOptions::new())
        .map_err(DeviceError::Other)
}

pub(super) fn create_pipeline(
    device: &Device,
    library: &Library,
    function_name: &str,
) -> Result<ComputePipelineState, DeviceError> {
    let function = library
        .get_function(function_name, None)
        .map_err(DeviceError::Other)?;

    device
        .new_compute_pipeline_state_with_function(&function)
        .map_err(DeviceError::Other)
}

pub(super) fn new_shared_buffer(device: &Device, size_bytes: usize) -> Buffer {
    device.new_buffer(
        size_bytes.max(mem::size_of::<u32>()) as u64,
        MTLResourceOptions::StorageModeShared,
    )
}

pub(super) fn new_private_buffer(device: &Device, size_bytes: usize) -> Buffer {
    device.new_buffer(
        size_bytes.max(mem::size_of::<u32>()) as u64,
        MTLResourceOptions::StorageModePrivate,
    )
}

pub(super) fn set_bytes<T: Copy>(encoder: &metal::ComputeCommandEncoderRef, index: u64, value: &T) {
    encoder.set_bytes(
        index,
        mem::size_of::<T>() as u64,
        value as *const T as *const c_void,
    );
}
