//! Explicit GPU context.
//!
//! One context is created at startup and passed by reference to every
//! component that issues backend calls; there is no ambient or global
//! device state. The handles are internally refcounted, so components
//! that outlive the setup phase store their own clones.

use super::GpuError;

/// Adapter, device, and queue bundle shared by compute and render sides.
#[derive(Clone)]
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Create a headless context (compute only, no surface).
    pub async fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        Self::request(&instance, None).await
    }

    /// Create a context whose adapter can present to `surface`.
    pub async fn for_surface(
        instance: &wgpu::Instance,
        surface: &wgpu::Surface<'_>,
    ) -> Result<Self, GpuError> {
        Self::request(instance, Some(surface)).await
    }

    async fn request(
        instance: &wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self, GpuError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        log::info!("Using GPU: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("lenia-stream device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        Ok(Self {
            adapter,
            device,
            queue,
        })
    }

    /// Block until all submitted GPU work has completed.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::PollType::wait_indefinitely()).ok();
    }
}
