//! Windowed clear-color demo.
//!
//! Drives the submission cycle with the simplest possible payload: a
//! dynamic-rendering pass that clears the acquired image to a color derived
//! from the frame counter. No pipeline, no geometry.

use ash::vk;
use cadence_renderer::{prelude::*, TickStatus};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

struct App {
    window: Option<Window>,
    renderer: Option<Renderer>,
}

impl Default for App {
    fn default() -> Self {
        Self {
            window: None,
            renderer: None,
        }
    }
}

fn record_gradient_clear(ctx: &RecordContext<'_>) {
    // Pulsing green channel; purely demo content, any payload works here.
    let green = ((100 + ctx.frame_index) % 128) as f32 / 256.0;
    let clear_value = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.0, green, 0.0, 1.0],
        },
    };

    let color_attachment = vk::RenderingAttachmentInfo::default()
        .image_view(ctx.image_view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(clear_value);
    let color_attachments = [color_attachment];

    let rendering_info = vk::RenderingInfo::default()
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: ctx.extent,
        })
        .layer_count(1)
        .color_attachments(&color_attachments);

    unsafe {
        ctx.device
            .cmd_begin_rendering(ctx.command_buffer, &rendering_info);
        ctx.device.cmd_end_rendering(ctx.command_buffer);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let window_attrs = Window::default_attributes()
            .with_title("Cadence Renderer - Gradient")
            .with_inner_size(winit::dpi::LogicalSize::new(800, 600));

        let window = event_loop.create_window(window_attrs).unwrap();
        let size = window.inner_size();
        let surface_provider = WindowSurfaceProvider::new(&window, size.width, size.height);

        match Renderer::new(&surface_provider) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.window = Some(window);
                log::info!("Renderer initialized successfully!");
            }
            Err(e) => {
                log::error!("Failed to create renderer: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = &mut self.renderer {
                    match renderer.render_frame(&mut record_gradient_clear) {
                        Ok(report) if report.status == TickStatus::Presented => {}
                        Ok(report) => {
                            // Retryable; rebuilding on resize is out of scope
                            // for this demo, so just keep ticking.
                            log::warn!(
                                "tick {} (slot {}) reported {:?}",
                                report.tick,
                                report.slot,
                                report.status
                            );
                        }
                        Err(e) => {
                            log::error!("Render error: {e}");
                            event_loop.exit();
                        }
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    event_loop.run_app(&mut app).expect("Event loop error");

    Ok(())
}
