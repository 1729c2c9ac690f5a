//! Worker-Thread-Anbindung: serialisierter Kommando-Strom an den Matcher.
//!
//! Die UI-Seite reicht Kurvenpunkte ueber einen beschraenkten Channel an
//! einen Worker weiter, der den Matcher exklusiv besitzt. Abbruch ist
//! schlicht ein `Clear` am Kopf der Queue; `wait_idle` ist ein Rendezvous,
//! das die Abarbeitung aller vorherigen Kommandos garantiert.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::JoinHandle;

use crate::core::geometry::Point;
use crate::json;
use crate::matcher::Matcher;

/// Kommandos an den Worker.
pub enum WorkerCommand {
    AddPoint(Point, i32),
    EndCurve(i32),
    Clear,
    /// Rendezvous: beantwortet, sobald alles davor abgearbeitet ist
    Idle(Sender<()>),
    Stop,
}

/// Besitzt den Matcher in einem eigenen Thread.
pub struct CurveWorker {
    commands: Sender<WorkerCommand>,
    results: Receiver<String>,
    handle: Option<JoinHandle<()>>,
}

impl CurveWorker {
    /// Startet den Worker; der Matcher wandert in den Thread.
    pub fn spawn(mut matcher: Box<dyn Matcher>) -> Self {
        let (commands, rx) = bounded::<WorkerCommand>(256);
        let (result_tx, results) = bounded::<String>(16);

        let handle = std::thread::spawn(move || {
            log::debug!("Worker gestartet");
            matcher.clear_curve();
            for command in rx {
                match command {
                    WorkerCommand::AddPoint(point, t) => matcher.add_point(point, t),
                    WorkerCommand::EndCurve(id) => {
                        matcher.end_curve(id);
                        let _ = result_tx.send(json::result_to_string(matcher.base()));
                    }
                    WorkerCommand::Clear => matcher.clear_curve(),
                    WorkerCommand::Idle(ack) => {
                        let _ = ack.send(());
                    }
                    WorkerCommand::Stop => break,
                }
            }
            log::debug!("Worker beendet");
        });

        Self {
            commands,
            results,
            handle: Some(handle),
        }
    }

    pub fn add_point(&self, point: Point, timestamp: i32) {
        let _ = self
            .commands
            .send(WorkerCommand::AddPoint(point, timestamp));
    }

    pub fn end_curve(&self, id: i32) {
        let _ = self.commands.send(WorkerCommand::EndCurve(id));
    }

    pub fn clear_curve(&self) {
        let _ = self.commands.send(WorkerCommand::Clear);
    }

    /// Blockiert, bis der Worker alle bisherigen Kommandos verarbeitet hat.
    ///
    /// Nur fuer Tests und die CLI; eine echte Anwendung konsumiert die
    /// Ergebnisse asynchron ueber [`CurveWorker::take_result`].
    pub fn wait_idle(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.commands.send(WorkerCommand::Idle(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Naechstes Ergebnis-JSON (blockierend).
    pub fn take_result(&self) -> Option<String> {
        self.results.recv().ok()
    }

    /// Stoppt den Worker und wartet auf das Thread-Ende.
    pub fn stop(mut self) {
        let _ = self.commands.send(WorkerCommand::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CurveWorker {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::Key;
    use crate::core::tree::WordTree;
    use crate::matcher::CurveMatch;
    use std::sync::Arc;

    fn worker_with_layout() -> CurveWorker {
        let mut cm = CurveMatch::new();
        cm.set_tree(Arc::new(WordTree::from_words(&["ab"])));
        cm.add_key(Key::new(50, 50, 100, 100, 'a'));
        cm.add_key(Key::new(450, 50, 100, 100, 'b'));
        CurveWorker::spawn(Box::new(cm))
    }

    #[test]
    fn test_worker_processes_command_stream() {
        let worker = worker_with_layout();
        for i in 0..30 {
            worker.add_point(Point::new(50 + i * 14, 50), i * 16);
        }
        worker.end_curve(7);
        let result = worker.take_result().expect("Ergebnis erwartet");
        let value: serde_json::Value =
            serde_json::from_str(&result).expect("Ergebnis muss JSON sein");
        assert_eq!(value["id"], 7);
        let names: Vec<&str> = value["candidates"]
            .as_array()
            .expect("Array")
            .iter()
            .filter_map(|c| c["name"].as_str())
            .collect();
        assert!(names.contains(&"ab"), "names = {names:?}");
        worker.stop();
    }

    #[test]
    fn test_clear_discards_curve() {
        let worker = worker_with_layout();
        worker.add_point(Point::new(50, 50), 0);
        worker.clear_curve();
        worker.wait_idle();
        worker.end_curve(1);
        let result = worker.take_result().expect("Ergebnis erwartet");
        let value: serde_json::Value = serde_json::from_str(&result).expect("JSON");
        assert!(value["candidates"].as_array().expect("Array").is_empty());
        worker.stop();
    }
}
