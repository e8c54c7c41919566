//! Render engine.
//!
//! Consumer side of the frame stream: imports the shared buffer handles
//! once at startup, then per frame takes the oldest computed slot from
//! the ring, draws it as a point list over the whole window, and
//! recycles the slot. The simulation runs on a dedicated producer
//! thread; the two threads cooperate only through the ring.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::compute::gpu::{GpuContext, GpuError};
use crate::schema::{Seed, SimulationConfig};
use crate::stream::{FrameSource, FrameVertex, MultiBufferRing};

use super::fps::FpsCounter;

const RENDER_SHADER: &str = include_str!("shaders/render.wgsl");

/// Output slots shared with the producer; the depth the presentation
/// layer keeps in flight.
const FRAMES_IN_FLIGHT: usize = 3;

const WINDOW_TITLE: &str = "lenia-stream";

/// Run the blocking render loop until the window is closed.
pub fn run(config: SimulationConfig, seed: Seed) -> Result<(), winit::error::EventLoopError> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config, seed);
    event_loop.run_app(&mut app)
}

struct App {
    config: SimulationConfig,
    seed: Seed,
    state: Option<RenderState>,
}

impl App {
    fn new(config: SimulationConfig, seed: Seed) -> Self {
        Self {
            config,
            seed,
            state: None,
        }
    }
}

struct RenderState {
    window: Arc<Window>,
    context: GpuContext,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    frames: Vec<wgpu::Buffer>,
    vertex_count: u32,
    ring: Arc<MultiBufferRing>,
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    fps: FpsCounter,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        let window_attrs = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.config.width as u32,
                self.config.height as u32,
            ));
        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .expect("Failed to create window"),
        );

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .map_err(GpuError::from)
            .unwrap_or_else(|e| {
                log::error!("GPU setup failed: {}", e);
                std::process::exit(1);
            });
        let context = pollster::block_on(GpuContext::for_surface(&instance, &surface))
            .unwrap_or_else(|e| {
                log::error!("GPU setup failed: {}", e);
                std::process::exit(1);
            });

        let size = window.inner_size();
        let surface_config = surface
            .get_default_config(&context.adapter, size.width.max(1), size.height.max(1))
            .unwrap_or_else(|| {
                log::error!("GPU setup failed: {}", GpuError::SurfaceConfig);
                std::process::exit(1);
            });
        surface.configure(&context.device, &surface_config);

        let mut source = FrameSource::new(&context, &self.config, &self.seed, FRAMES_IN_FLIGHT);
        let frames = source.bind();
        let vertex_count = source.vertex_count();

        let pipeline = create_render_pipeline(&context.device, surface_config.format);

        let ring = Arc::new(MultiBufferRing::new(FRAMES_IN_FLIGHT));
        let running = Arc::new(AtomicBool::new(true));

        let producer = {
            let ring = Arc::clone(&ring);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("frame-producer".into())
                .spawn(move || producer_loop(source, &ring, &running))
                .expect("Failed to spawn producer thread")
        };

        log::info!(
            "Streaming {}x{} cells through {} frame buffers",
            self.config.width,
            self.config.height,
            FRAMES_IN_FLIGHT
        );

        window.request_redraw();
        self.state = Some(RenderState {
            window,
            context,
            surface,
            surface_config,
            pipeline,
            frames,
            vertex_count,
            ring,
            running,
            producer: Some(producer),
            fps: FpsCounter::new(),
        });
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down");
                if let Some(state) = &mut self.state {
                    state.shutdown();
                }
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("Escape pressed, shutting down");
                    if let Some(state) = &mut self.state {
                        state.shutdown();
                    }
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(new_size) => {
                if let Some(state) = &mut self.state {
                    state.resize(new_size);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    state.draw();
                    state.window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

/// Producer thread: acquire a free slot, fill it, publish it, repeat.
fn producer_loop(mut source: FrameSource, ring: &MultiBufferRing, running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        // A closed ring is the shutdown signal, not an error.
        let Ok(slot) = ring.acquire_write() else { break };
        source.next_frame(slot);
        ring.release_write(slot);
    }
}

impl RenderState {
    fn draw(&mut self) {
        let Ok(slot) = self.ring.acquire_read() else {
            return;
        };

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.context.device, &self.surface_config);
                self.ring.release_read(slot);
                return;
            }
            Err(e) => {
                log::error!("Surface error: {:?}", e);
                self.ring.release_read(slot);
                return;
            }
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Draw Encoder"),
                });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Frame Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.01,
                            g: 0.01,
                            b: 0.01,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_vertex_buffer(0, self.frames[slot].slice(..));
            pass.draw(0..self.vertex_count, 0..1);
        }

        self.context.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        // The slot goes back to the producer right after the draw is
        // submitted, not once presentation has provably finished reading
        // it. Producer writes go through the same queue and are ordered
        // after this submission, so they cannot overtake the draw; a
        // stricter policy would wait on a completion fence here.
        self.ring.release_read(slot);

        if let Some(fps) = self.fps.tick() {
            self.window
                .set_title(&format!("{} - {:.0} FPS", WINDOW_TITLE, fps));
        }
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.surface_config.width = new_size.width;
            self.surface_config.height = new_size.height;
            self.surface.configure(&self.context.device, &self.surface_config);
        }
    }

    /// Two-step shutdown: stop the producer loop from re-entering its
    /// wait, then wake everything still blocked on the ring, join, and
    /// drain the device before resources drop.
    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.ring.close();
        if let Some(producer) = self.producer.take() {
            producer.join().ok();
        }
        self.context.wait_idle();
    }
}

fn create_render_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Render Shader"),
        source: wgpu::ShaderSource::Wgsl(RENDER_SHADER.into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Render Pipeline Layout"),
        bind_group_layouts: &[],
        ..Default::default()
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Render Pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[FrameVertex::layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::PointList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}
