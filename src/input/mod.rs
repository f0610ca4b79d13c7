pub mod thread;

use crate::camera::{Camera, Orbit};
use crossterm::event::{Event, KeyCode, KeyEventKind};
use std::sync::mpsc::{Receiver, TryRecvError};

pub type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

const ROTATE_STEP: f32 = 0.08;
const TILT_STEP: f32 = 0.05;
const ZOOM_FACTOR: f32 = 1.15;
/// Radians per second while auto-orbit is on.
pub const AUTO_ORBIT_SPEED: f32 = 0.15;

/// Everything the keyboard can change between frames.
#[derive(Debug)]
pub struct ViewState {
    pub camera: Camera,
    pub orbit: Orbit,
    pub auto_orbit: bool,
    pub show_hud: bool,
    pub quit_requested: bool,
}

impl ViewState {
    pub fn new(show_hud: bool) -> Self {
        let orbit = Orbit::default();
        let mut camera = Camera::default();
        orbit.apply(&mut camera);
        Self {
            camera,
            orbit,
            auto_orbit: false,
            show_hud,
            quit_requested: false,
        }
    }

    pub fn reset(&mut self) {
        self.orbit = Orbit::default();
        self.orbit.apply(&mut self.camera);
        self.auto_orbit = false;
    }

    /// Advances auto-orbit by `seconds` and re-aims the camera.
    pub fn advance(&mut self, seconds: f32) {
        if self.auto_orbit && seconds > 0.0 {
            self.orbit.rotate(AUTO_ORBIT_SPEED * seconds);
            self.orbit.apply(&mut self.camera);
        }
    }
}

pub fn drain_input_events(
    view: &mut ViewState,
    input_rx: &Receiver<thread::InputMessage>,
) -> AppResult<bool> {
    loop {
        match input_rx.try_recv() {
            Ok(thread::InputMessage::Event(event)) => {
                handle_input_event(view, event);
                if view.quit_requested {
                    return Ok(true);
                }
            }
            Ok(thread::InputMessage::ReadError(err)) => {
                return Err(format!("Input thread read failed: {err}").into());
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                return Err("Input channel disconnected".into());
            }
        }
    }

    Ok(view.quit_requested)
}

pub fn handle_input_event(view: &mut ViewState, event: Event) {
    let Event::Key(key_event) = event else {
        return;
    };
    if !matches!(key_event.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
        return;
    }

    match key_event.code {
        KeyCode::Esc => view.quit_requested = true,
        KeyCode::Tab => view.show_hud = !view.show_hud,
        KeyCode::Left => view.orbit.rotate(-ROTATE_STEP),
        KeyCode::Right => view.orbit.rotate(ROTATE_STEP),
        KeyCode::Up => view.orbit.tilt(TILT_STEP),
        KeyCode::Down => view.orbit.tilt(-TILT_STEP),
        KeyCode::Char('+') | KeyCode::Char('=') => view.orbit.zoom(1.0 / ZOOM_FACTOR),
        KeyCode::Char('-') | KeyCode::Char('_') => view.orbit.zoom(ZOOM_FACTOR),
        KeyCode::Char(' ') => view.auto_orbit = !view.auto_orbit,
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'q' => view.quit_requested = true,
            'r' => view.reset(),
            _ => {}
        },
        _ => return,
    }
    view.orbit.apply(&mut view.camera);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEvent, KeyEventState, KeyModifiers};
    use std::sync::mpsc;

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn arrows_move_the_camera_around_the_target() {
        let mut view = ViewState::new(true);
        let start = view.camera.position;
        let radius = view.orbit.radius;

        handle_input_event(&mut view, key(KeyCode::Right));
        assert!((view.camera.position - start).length() > 1e-3);
        assert!((view.camera.position.length() - radius).abs() < 1e-2);

        let before_tilt = view.orbit.elevation;
        handle_input_event(&mut view, key(KeyCode::Up));
        assert!(view.orbit.elevation > before_tilt);
    }

    #[test]
    fn zoom_keys_change_radius() {
        let mut view = ViewState::new(true);
        let base = view.orbit.radius;
        handle_input_event(&mut view, key(KeyCode::Char('=')));
        assert!(view.orbit.radius < base);

        let closer = view.orbit.radius;
        handle_input_event(
            &mut view,
            Event::Key(KeyEvent::new(KeyCode::Char('_'), KeyModifiers::SHIFT)),
        );
        assert!(view.orbit.radius > closer);
    }

    #[test]
    fn release_events_are_ignored() {
        let mut view = ViewState::new(true);
        let release = KeyEvent {
            code: KeyCode::Tab,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        };
        handle_input_event(&mut view, Event::Key(release));
        assert!(view.show_hud);
    }

    #[test]
    fn reset_returns_home_and_stops_orbiting() {
        let mut view = ViewState::new(true);
        let home = view.camera.position;
        handle_input_event(&mut view, key(KeyCode::Char(' ')));
        view.advance(2.0);
        handle_input_event(&mut view, key(KeyCode::Char('-')));
        assert!((view.camera.position - home).length() > 1.0);

        handle_input_event(&mut view, key(KeyCode::Char('R')));
        assert!(!view.auto_orbit);
        assert!((view.camera.position - home).length() < 1e-3);
    }

    #[test]
    fn auto_orbit_only_advances_when_enabled() {
        let mut view = ViewState::new(true);
        let start = view.orbit.angle;
        view.advance(1.0);
        assert_eq!(view.orbit.angle, start);

        handle_input_event(&mut view, key(KeyCode::Char(' ')));
        view.advance(1.0);
        assert!((view.orbit.angle - start - AUTO_ORBIT_SPEED).abs() < 1e-4);
    }

    #[test]
    fn drain_stops_at_quit() {
        let (tx, rx) = mpsc::channel();
        tx.send(thread::InputMessage::Event(key(KeyCode::Tab)))
            .expect("send tab");
        tx.send(thread::InputMessage::Event(key(KeyCode::Char('q'))))
            .expect("send q");
        tx.send(thread::InputMessage::Event(key(KeyCode::Tab)))
            .expect("send tab");

        let mut view = ViewState::new(true);
        let quit = drain_input_events(&mut view, &rx).expect("drain should succeed");
        assert!(quit);
        assert!(!view.show_hud);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn drain_reports_read_errors_and_disconnects() {
        let (tx, rx) = mpsc::channel();
        tx.send(thread::InputMessage::ReadError("boom".into()))
            .expect("send error");
        let mut view = ViewState::new(true);
        assert!(drain_input_events(&mut view, &rx).is_err());

        drop(tx);
        assert!(drain_input_events(&mut view, &rx).is_err());
    }
}
