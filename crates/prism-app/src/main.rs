// Entry point — window creation and the progressive render loop.
//
// One accumulation pass runs per event-loop iteration, so window events are
// polled between passes; the single-frame-in-flight design means each
// iteration fully serializes the host against the GPU. After the final pass
// the accumulated image is exported once and the loop drops to waiting on
// events until the window is closed.

use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use prism_renderer::{demo_scene, samples_for_pass, RenderSettings, Renderer};

/// Application state for the winit event loop.
struct PrismApp {
    // The window must outlive the renderer; holding it here guarantees that.
    _window: Arc<Window>,
    renderer: Renderer,
    pass: u32,
    exported: bool,
}

impl ApplicationHandler for PrismApp {
    fn resumed(&mut self, _event_loop: &ActiveEventLoop) {
        // Window and renderer are created before the loop starts
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        if let WindowEvent::CloseRequested = event {
            // Stop issuing passes; an in-flight pass has already completed
            // because every iteration waits on the fence.
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let total_passes = self.renderer.settings().total_passes;
        let total_samples = self.renderer.settings().total_samples;

        if self.pass < total_passes {
            self.pass += 1;

            // SAFETY: the window outlives the renderer (held above).
            if let Err(e) = unsafe { self.renderer.render_pass(self.pass) } {
                eprintln!("Render pass {} failed: {}", self.pass, e);
                event_loop.exit();
                return;
            }

            if self.pass % 10 == 0 || self.pass == total_passes {
                println!(
                    "Pass {}/{} ({} samples per pixel)",
                    self.pass,
                    total_passes,
                    samples_for_pass(self.pass, total_passes, total_samples)
                );
            }
        } else if !self.exported {
            self.exported = true;

            let output_path = self.renderer.settings().output_path.clone();
            // SAFETY: all passes have completed; the image is idle.
            match unsafe { self.renderer.save_image(&output_path) } {
                Ok(()) => println!("Wrote {}", output_path.display()),
                Err(e) => eprintln!("Failed to export image: {}", e),
            }

            // Rendering is done; only wake up for window events from here on
            event_loop.set_control_flow(ControlFlow::Wait);
        }
    }
}

fn main() {
    let settings = RenderSettings::default();
    let scene = demo_scene();

    let event_loop = EventLoop::new().expect("Event loop creation failed");

    let window_attrs = WindowAttributes::default()
        .with_title("prism")
        .with_inner_size(PhysicalSize::new(
            settings.window_width,
            settings.window_height,
        ))
        .with_resizable(false);

    // Note: In winit 0.30, windows should be created from an ActiveEventLoop.
    // For one-shot initialization we use the pre-run approach.
    #[allow(deprecated)]
    let window = match event_loop.create_window(window_attrs) {
        Ok(window) => Arc::new(window),
        Err(e) => {
            eprintln!("Window creation failed: {}", e);
            std::process::exit(1);
        }
    };

    // SAFETY: the window handles stay valid for the renderer's lifetime.
    let renderer = match unsafe { Renderer::new(settings, &scene, &window) } {
        Ok(renderer) => renderer,
        Err(e) => {
            eprintln!("Renderer initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PrismApp {
        _window: window,
        renderer,
        pass: 0,
        exported: false,
    };

    event_loop.run_app(&mut app).expect("Event loop error");
}
