use crossterm::event;
use std::io;
use std::sync::mpsc::{self, Receiver};
use std::thread;

#[derive(Debug)]
pub enum InputMessage {
    Event(crossterm::event::Event),
    ReadError(String),
}

pub type InputReceiver = Receiver<InputMessage>;

/// Blocks on `event::read` off the frame thread so a slow terminal never
/// stalls a tick. The thread exits once the receiver is dropped.
pub fn spawn_input_thread() -> io::Result<InputReceiver> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stardust-input".into())
        .spawn(move || loop {
            match event::read() {
                Ok(ev) => {
                    if tx.send(InputMessage::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(InputMessage::ReadError(err.to_string()));
                    break;
                }
            }
        })?;
    Ok(rx)
}
