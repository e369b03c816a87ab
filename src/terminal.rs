// SPDX-License-Identifier: GPL-3.0-only

//! Terminal presentation surface
//!
//! Drives the render loop at the configured rate, reads the frame buffer
//! back after every tick and draws it with Unicode half-block characters
//! (two vertical pixels per cell). Keys and mouse drags go to the viewer's
//! input handler; terminal resizes reshape the off-screen frame buffer.

use crate::backends::open_device;
use crate::config::Config;
use crate::frame::Resolution;
use crate::gpu::GpuBackend;
use crate::input::{InputOutcome, KeyBindings, MouseButton};
use crate::tracker::{DepthTracker, MeshTracker};
use crate::viewer::MeshViewer;

use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind,
        KeyModifiers, MouseButton as TermButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal, backend::CrosstermBackend, buffer::Buffer, layout::Rect, style::Color,
    widgets::Widget,
};
use std::io::{self, stdout};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Run the terminal viewer with `backend` until the user quits
pub fn run<B: GpuBackend>(backend: B, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = DepthTracker::new(config.pipeline);
    let mut viewer = MeshViewer::new(backend, tracker, config.viewer_settings())?;
    let device = open_device(config.device, config.camera_resolution, config.device_fps);
    viewer.attach_device(device)?;

    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = run_app(&mut terminal, &mut viewer, config);

    // GPU resources go first, then the device
    viewer.shutdown();

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

/// Off-screen frame buffer size for a frame area of `area` cells
fn screen_for_area(area: Rect, scale: u32) -> Resolution {
    Resolution::new(
        (area.width as u32 * scale).max(1),
        (area.height as u32 * 2 * scale).max(1),
    )
}

fn run_app<B: GpuBackend, T: MeshTracker>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    viewer: &mut MeshViewer<B, T>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let tick_interval = Duration::from_secs(1) / config.target_fps.max(1);
    let scale = config.render_scale.max(1);
    let mut frame_widget = FrameWidget::default();
    let mut show_help = false;
    let mut frame_area = Rect::default();

    loop {
        let tick_start = Instant::now();

        // Reserve bottom line for status
        let area: Rect = terminal.size()?.into();
        let area = Rect {
            height: area.height.saturating_sub(1),
            ..area
        };
        if area != frame_area && !area.is_empty() {
            let screen = screen_for_area(area, scale);
            match viewer.reshape(screen) {
                Ok(()) => {
                    info!(screen = %screen, "Frame buffer resized");
                    frame_area = area;
                }
                Err(e) => warn!(screen = %screen, error = %e, "Resize failed"),
            }
        }

        let report = viewer.tick(tick_start);
        match viewer.read_frame() {
            Ok((resolution, rgba)) => frame_widget.update(resolution, rgba),
            Err(e) => warn!(error = %e, "Frame read-back failed"),
        }

        let status = if show_help {
            help_message(&config.key_bindings)
        } else {
            status_message(viewer, report.render_error.is_some())
        };

        terminal.draw(|f| {
            let full = f.area();
            f.render_widget(&frame_widget, area);
            let status_area = Rect {
                x: full.x,
                y: full.height.saturating_sub(1),
                width: full.width,
                height: 1,
            };
            f.render_widget(StatusBar { message: &status }, status_area);
        })?;

        // Handle input until the next tick is due
        while let Some(timeout) = tick_interval.checked_sub(tick_start.elapsed()) {
            if !event::poll(timeout)? {
                break;
            }
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
                    {
                        return Ok(());
                    }
                    let KeyCode::Char(c) = key.code else {
                        continue;
                    };
                    match viewer.handle_key(c) {
                        InputOutcome::Quit => return Ok(()),
                        InputOutcome::Ignored if c == 'h' => show_help = !show_help,
                        _ => {}
                    }
                }
                Event::Mouse(mouse) => handle_mouse(viewer, mouse, scale),
                _ => {}
            }
        }
    }
}

fn handle_mouse<B: GpuBackend, T: MeshTracker>(
    viewer: &mut MeshViewer<B, T>,
    mouse: MouseEvent,
    scale: u32,
) {
    // Cell coordinates to frame-buffer pixels
    let x = mouse.column as f32 * scale as f32;
    let y = mouse.row as f32 * 2.0 * scale as f32;
    match mouse.kind {
        MouseEventKind::Down(TermButton::Left) => viewer.mouse_down(MouseButton::Left, x, y),
        MouseEventKind::Down(TermButton::Right) => viewer.mouse_down(MouseButton::Right, x, y),
        MouseEventKind::Drag(_) => {
            viewer.mouse_drag(x, y);
        }
        MouseEventKind::Up(_) => viewer.mouse_up(),
        MouseEventKind::ScrollUp | MouseEventKind::ScrollDown => {
            let steps = if mouse.kind == MouseEventKind::ScrollUp { 1.0 } else { -1.0 };
            viewer.mouse_scroll(steps, mouse.modifiers.contains(KeyModifiers::CONTROL));
        }
        _ => {}
    }
}

fn status_message<B: GpuBackend, T: MeshTracker>(
    viewer: &MeshViewer<B, T>,
    skipped: bool,
) -> String {
    let display = viewer.display();
    let options = viewer.options();
    let mut msg = format!(
        "{} | {:.1} fps | filter {:?} | normals {:?} | max {:.2} m",
        display.mode(),
        viewer.fps(),
        options.filter_mode,
        options.normal_mode,
        options.max_depth
    );
    if display.paused {
        msg.push_str(" | PAUSED");
    }
    if skipped {
        msg.push_str(" | no data");
    }
    msg.push_str(" | 'h' help | 'q' quit");
    msg
}

fn help_message(bindings: &KeyBindings) -> String {
    let keys: Vec<String> = bindings
        .0
        .iter()
        .map(|(key, action)| {
            let key = if key == " " { "space" } else { key.as_str() };
            format!("{}:{}", key, action.label())
        })
        .collect();
    format!("{} | h: help | Ctrl+C: quit", keys.join(" "))
}

/// Widget that draws the read-back frame buffer with half-block characters
#[derive(Default)]
struct FrameWidget {
    frame: Option<(Resolution, Vec<u8>)>,
}

impl FrameWidget {
    fn update(&mut self, resolution: Resolution, rgba: Vec<u8>) {
        if rgba.len() == resolution.pixel_count() * 4 && !resolution.is_empty() {
            self.frame = Some((resolution, rgba));
        }
    }
}

impl Widget for &FrameWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some((resolution, rgba)) = &self.frame else {
            let msg = "Waiting for frames...";
            let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
            let y = area.y + area.height / 2;
            if y < area.y + area.height && x < area.x + area.width {
                buf.set_string(x, y, msg, ratatui::style::Style::default());
            }
            return;
        };
        if area.is_empty() {
            return;
        }

        // Each cell covers 2 vertical pixels: upper half (▀) is fg, lower half bg
        let x_scale = resolution.width as f64 / area.width as f64;
        let y_scale = resolution.height as f64 / (area.height as f64 * 2.0);

        for ty in 0..area.height {
            for tx in 0..area.width {
                let src_x = (tx as f64 * x_scale) as u32;
                let src_y_top = (ty as f64 * 2.0 * y_scale) as u32;
                let src_y_bottom = ((ty as f64 * 2.0 + 1.0) * y_scale) as u32;

                let top = sample_pixel(*resolution, rgba, src_x, src_y_top);
                let bottom = sample_pixel(*resolution, rgba, src_x, src_y_bottom);

                if let Some(cell) = buf.cell_mut((area.x + tx, area.y + ty)) {
                    cell.set_char('▀');
                    cell.set_fg(top);
                    cell.set_bg(bottom);
                }
            }
        }
    }
}

fn sample_pixel(resolution: Resolution, rgba: &[u8], x: u32, y: u32) -> Color {
    let x = x.min(resolution.width - 1);
    let y = y.min(resolution.height - 1);
    let idx = (y as usize * resolution.width as usize + x as usize) * 4;
    match rgba.get(idx..idx + 3) {
        Some(px) => Color::Rgb(px[0], px[1], px[2]),
        None => Color::Black,
    }
}

/// Status bar widget
struct StatusBar<'a> {
    message: &'a str,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(Color::DarkGray);
            }
        }

        let text: String = self.message.chars().take(area.width as usize).collect();
        buf.set_string(
            area.x,
            area.y,
            text,
            ratatui::style::Style::default()
                .fg(Color::White)
                .bg(Color::DarkGray),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_for_area() {
        let area = Rect::new(0, 0, 80, 23);
        assert_eq!(screen_for_area(area, 4), Resolution::new(320, 184));
    }

    #[test]
    fn test_frame_widget_draws_half_blocks() {
        // Top row red, bottom row blue
        let res = Resolution::new(1, 2);
        let mut widget = FrameWidget::default();
        widget.update(res, vec![255, 0, 0, 255, 0, 0, 255, 255]);

        let area = Rect::new(0, 0, 1, 1);
        let mut buf = Buffer::empty(area);
        (&widget).render(area, &mut buf);
        let cell = &buf[(0, 0)];
        assert_eq!(cell.symbol(), "▀");
        assert_eq!(cell.fg, Color::Rgb(255, 0, 0));
        assert_eq!(cell.bg, Color::Rgb(0, 0, 255));
    }

    #[test]
    fn test_help_lists_bindings() {
        let help = help_message(&KeyBindings::default());
        assert!(help.contains("2:depth"));
        assert!(help.contains("space:pause"));
    }
}
