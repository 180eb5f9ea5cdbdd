//! GPU ensemble backend
//!
//! Implements [`EnsembleBackend`] with a single wgpu compute pipeline. The field
//! function's WGSL is spliced into `field_kernel.wgsl`; the ensemble lives in one
//! read-write storage buffer and is read back through a staging buffer.
//!
//! # Error checking
//!
//! With [`ErrorCheckMode::PerOperation`] every device call runs inside an
//! out-of-memory and a validation error scope and blocks until the queue drains, so a
//! failure is attributed to the exact operation. With [`ErrorCheckMode::Deferred`]
//! errors are collected by the uncaptured-error handler and only surface at the next
//! readback or [`check`](EnsembleBackend::check).

use super::EnsembleBackend;
use crate::config::ErrorCheckMode;
use crate::device::{DeviceCandidate, GpuContext};
use crate::ensemble::{ensemble_bytes, SamplePoint};
use crate::error::SimError;
use crate::kernel::{FieldFunction, FieldParams};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

const WORKGROUP_SIZE: u32 = 64;
const FIELD_FUNCTION_SLOT: &str = "{{FIELD_FUNCTION}}";

/// Per-pass shader input (must match `PassInput` in `field_kernel.wgsl`)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct PassInput {
    time: f32,
    count: u32,
    row_stride: u32,
    _pad: u32,
}

/// Splice a `field_value` definition into the compute shader template
#[must_use]
pub fn assemble_shader(kernel: &str) -> String {
    include_str!("field_kernel.wgsl").replace(FIELD_FUNCTION_SLOT, kernel)
}

/// Workgroup grid covering `count` points
///
/// Spills into a second dimension once one dimension would exceed `max_per_dimension`.
fn workgroup_grid(count: u32, max_per_dimension: u32) -> (u32, u32) {
    let groups = count.div_ceil(WORKGROUP_SIZE).max(1);
    if groups <= max_per_dimension {
        (groups, 1)
    } else {
        (max_per_dimension, groups.div_ceil(max_per_dimension))
    }
}

fn push_scopes(device: &wgpu::Device, mode: ErrorCheckMode) {
    if mode == ErrorCheckMode::PerOperation {
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
    }
}

fn pop_scopes(
    device: &wgpu::Device,
    mode: ErrorCheckMode,
    operation: &'static str,
    bytes: u64,
) -> Result<(), SimError> {
    if mode != ErrorCheckMode::PerOperation {
        return Ok(());
    }
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    if let Some(error) = out_of_memory {
        return Err(SimError::Allocation {
            operation,
            bytes,
            message: error.to_string(),
        });
    }
    match validation {
        Some(error) => Err(SimError::device(operation, error)),
        None => Ok(()),
    }
}

/// Device storage for one ensemble
struct EnsembleBuffers {
    points: wgpu::Buffer,
    staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    count: u32,
}

/// wgpu compute backend
pub struct GpuBackend {
    context: GpuContext,
    check_mode: ErrorCheckMode,
    kernel_name: &'static str,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    pass_buffer: wgpu::Buffer,
    params_uploaded: bool,
    ensemble: Option<EnsembleBuffers>,
    pending: Arc<Mutex<Option<String>>>,
}

impl GpuBackend {
    /// Compile the field kernel for `function` on `context`
    ///
    /// # Errors
    /// - [`SimError::InvalidConfig`] if `function` has no WGSL kernel
    /// - [`SimError::DeviceExecution`] if the shader or pipeline fails validation
    ///   (reported immediately only with per-operation checking)
    pub fn new(
        context: GpuContext,
        function: &dyn FieldFunction,
        check_mode: ErrorCheckMode,
    ) -> Result<Self, SimError> {
        let kernel = function.wgsl().ok_or_else(|| {
            SimError::InvalidConfig(format!(
                "field function '{}' has no device kernel",
                function.name()
            ))
        })?;

        let pending = Arc::new(Mutex::new(None::<String>));
        let sink = Arc::clone(&pending);
        context
            .device()
            .on_uncaptured_error(Box::new(move |error: wgpu::Error| {
                if let Ok(mut slot) = sink.lock() {
                    slot.get_or_insert_with(|| error.to_string());
                }
            }));

        let device = context.device();
        push_scopes(device, check_mode);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Field Kernel Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(assemble_shader(kernel))),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Field Kernel Bind Group Layout"),
            entries: &[
                // points (read-write storage)
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // params (uniform)
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // pass input (uniform)
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Field Kernel Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Field Kernel Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Params"),
            size: std::mem::size_of::<FieldParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let pass_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Pass Input"),
            size: std::mem::size_of::<PassInput>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        pop_scopes(device, check_mode, "compile field kernel", 0)?;
        debug!("Compiled field kernel '{}'", function.name());

        Ok(Self {
            context,
            check_mode,
            kernel_name: function.name(),
            pipeline,
            bind_group_layout,
            params_buffer,
            pass_buffer,
            params_uploaded: false,
            ensemble: None,
            pending,
        })
    }

    fn per_operation(&self) -> bool {
        self.check_mode == ErrorCheckMode::PerOperation
    }

    /// Submit staged writes and, with per-operation checking, wait for the queue
    fn flush(&self) {
        self.context.queue().submit(std::iter::empty());
        if self.per_operation() {
            self.context.device().poll(wgpu::Maintain::Wait);
        }
    }

    fn take_pending(&self, operation: &str) -> Result<(), SimError> {
        let message = self.pending.lock().ok().and_then(|mut slot| slot.take());
        match message {
            Some(message) => Err(SimError::device(operation, message)),
            None => Ok(()),
        }
    }

    fn allocate(&self, count: u32, bytes: u64) -> Result<EnsembleBuffers, SimError> {
        let limit = self.context.max_ensemble_bytes();
        if bytes > limit {
            return Err(SimError::Allocation {
                operation: "allocate device ensemble",
                bytes,
                message: format!("exceeds the device storage binding limit of {limit} bytes"),
            });
        }

        let device = self.context.device();
        push_scopes(device, self.check_mode);

        let points = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Ensemble Buffer"),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Ensemble Readback Buffer"),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Field Kernel Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: points.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.pass_buffer.as_entire_binding(),
                },
            ],
        });

        if let Err(e) = pop_scopes(device, self.check_mode, "allocate device ensemble", bytes) {
            points.destroy();
            staging.destroy();
            return Err(e);
        }

        debug!("Allocated device ensemble: {} points ({} bytes)", count, bytes);
        Ok(EnsembleBuffers {
            points,
            staging,
            bind_group,
            count,
        })
    }
}

impl EnsembleBackend for GpuBackend {
    fn upload_params(&mut self, params: &FieldParams) -> Result<(), SimError> {
        let device = self.context.device();
        push_scopes(device, self.check_mode);
        self.context
            .queue()
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
        self.flush();
        pop_scopes(
            device,
            self.check_mode,
            "copy parameters host to device",
            std::mem::size_of::<FieldParams>() as u64,
        )?;
        self.params_uploaded = true;
        Ok(())
    }

    fn upload_points(&mut self, points: &[SamplePoint]) -> Result<(), SimError> {
        let count = u32::try_from(points.len()).map_err(|_| {
            SimError::InvalidConfig(format!("{} points exceed the device index range", points.len()))
        })?;
        if count == 0 {
            return Err(SimError::InvalidConfig("ensemble is empty".into()));
        }
        let bytes = ensemble_bytes(points.len());

        if !matches!(&self.ensemble, Some(e) if e.count == count) {
            self.release();
            self.ensemble = Some(self.allocate(count, bytes)?);
        }
        let Some(ensemble) = self.ensemble.as_ref() else {
            return Err(SimError::device("copy ensemble host to device", "no device storage"));
        };

        let device = self.context.device();
        push_scopes(device, self.check_mode);
        self.context
            .queue()
            .write_buffer(&ensemble.points, 0, bytemuck::cast_slice(points));
        self.flush();
        pop_scopes(device, self.check_mode, "copy ensemble host to device", bytes)
    }

    fn dispatch(&mut self, time: f32) -> Result<(), SimError> {
        if !self.params_uploaded {
            return Err(SimError::device(
                "dispatch field kernel",
                "parameters not uploaded",
            ));
        }
        let Some(ensemble) = self.ensemble.as_ref() else {
            return Err(SimError::device("dispatch field kernel", "ensemble not uploaded"));
        };

        let device = self.context.device();
        let max_per_dimension = device.limits().max_compute_workgroups_per_dimension;
        let (groups_x, groups_y) = workgroup_grid(ensemble.count, max_per_dimension);
        let input = PassInput {
            time,
            count: ensemble.count,
            row_stride: groups_x * WORKGROUP_SIZE,
            _pad: 0,
        };

        push_scopes(device, self.check_mode);
        self.context
            .queue()
            .write_buffer(&self.pass_buffer, 0, bytemuck::bytes_of(&input));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Field Kernel Encoder"),
        });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Field Kernel Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &ensemble.bind_group, &[]);
            compute_pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        self.context.queue().submit(Some(encoder.finish()));

        if self.per_operation() {
            device.poll(wgpu::Maintain::Wait);
        }
        trace!(
            "Dispatched '{}' at t={} ({}x{} workgroups)",
            self.kernel_name,
            time,
            groups_x,
            groups_y
        );
        pop_scopes(device, self.check_mode, "dispatch field kernel", 0)
    }

    fn download_points(&mut self, out: &mut [SamplePoint]) -> Result<(), SimError> {
        const OPERATION: &str = "copy ensemble device to host";

        let Some(ensemble) = self.ensemble.as_ref() else {
            return Err(SimError::device(OPERATION, "ensemble not uploaded"));
        };
        if out.len() != ensemble.count as usize {
            return Err(SimError::device(
                OPERATION,
                format!(
                    "length mismatch: device {} vs host {}",
                    ensemble.count,
                    out.len()
                ),
            ));
        }
        let bytes = ensemble_bytes(out.len());

        let device = self.context.device();
        push_scopes(device, self.check_mode);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Ensemble Copy Encoder"),
        });
        encoder.copy_buffer_to_buffer(&ensemble.points, 0, &ensemble.staging, 0, bytes);
        self.context.queue().submit(Some(encoder.finish()));

        // Map staging buffer and wait (blocking)
        let buffer_slice = ensemble.staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        device.poll(wgpu::Maintain::Wait);

        let mapped = match receiver.recv() {
            Ok(result) => result.map_err(|e| SimError::device(OPERATION, e)),
            Err(e) => Err(SimError::device(OPERATION, e)),
        };
        let checked = pop_scopes(device, self.check_mode, OPERATION, bytes)
            .and_then(|()| self.take_pending(OPERATION));

        if mapped.is_ok() {
            if checked.is_ok() {
                let data = buffer_slice.get_mapped_range();
                out.copy_from_slice(bytemuck::cast_slice(&data));
            }
            ensemble.staging.unmap();
        }
        mapped?;
        checked
    }

    fn check(&mut self, operation: &str) -> Result<(), SimError> {
        self.context.device().poll(wgpu::Maintain::Wait);
        self.take_pending(operation)
    }

    fn release(&mut self) {
        if let Some(ensemble) = self.ensemble.take() {
            ensemble.points.destroy();
            ensemble.staging.destroy();
            debug!("Released device ensemble of {} points", ensemble.count);
        }
    }

    fn is_allocated(&self) -> bool {
        self.ensemble.is_some()
    }

    fn kernel_name(&self) -> &'static str {
        self.kernel_name
    }

    fn device(&self) -> &DeviceCandidate {
        self.context.candidate()
    }

    fn is_accelerated(&self) -> bool {
        true
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        self.release();
    }
}
