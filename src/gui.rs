//! Indicator window using egui/eframe
//!
//! Mirrors the transfer collection from registry events and sends
//! open/start/cancel commands back to the bridge.

use eframe::egui::{self, Color32, RichText};
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::dispatcher::Command;
use crate::error::Result;
use crate::registry::ModelEvent;
use crate::transfer::{Transfer, TransferId, TransferState};

/// How often to poll for events when nothing else wakes the window
const REFRESH: Duration = Duration::from_millis(250);

/// Local copy of the observable collection, in arrival order
#[derive(Debug, Default)]
pub struct TransferMirror {
    transfers: BTreeMap<TransferId, Transfer>,
    order: Vec<TransferId>,
}

impl TransferMirror {
    pub fn apply(&mut self, event: ModelEvent) {
        match event {
            ModelEvent::Added { transfer } | ModelEvent::Changed { transfer } => {
                if !self.transfers.contains_key(&transfer.id) {
                    self.order.push(transfer.id);
                }
                self.transfers.insert(transfer.id, transfer);
            }
            ModelEvent::Removed { id, .. } => {
                self.transfers.remove(&id);
                self.order.retain(|known| *known != id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transfer> {
        self.order.iter().filter_map(|id| self.transfers.get(id))
    }

    pub fn active_count(&self) -> usize {
        self.transfers
            .values()
            .filter(|t| matches!(t.state, TransferState::Queued | TransferState::Running))
            .count()
    }
}

/// Which button was pressed on a row
#[derive(Debug, Clone, Copy)]
enum Action {
    Open,
    Start,
    Cancel,
}

/// GUI Application state
pub struct TransferApp {
    commands: mpsc::UnboundedSender<Command>,
    events: Receiver<ModelEvent>,
    mirror: TransferMirror,
    /// Replies not yet received, with what they were for
    pending: Vec<(String, oneshot::Receiver<Result<()>>)>,
    /// Last command failure, shown under the list
    last_error: Option<String>,
}

impl TransferApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        commands: mpsc::UnboundedSender<Command>,
        events: Receiver<ModelEvent>,
    ) -> Self {
        Self {
            commands,
            events,
            mirror: TransferMirror::default(),
            pending: Vec::new(),
            last_error: None,
        }
    }

    fn send(&mut self, action: Action, transfer: &Transfer) {
        let id = transfer.id;
        let (command, reply) = match action {
            Action::Open => Command::with_reply(|reply| Command::Open { id, reply }),
            Action::Start => Command::with_reply(|reply| Command::Start { id, reply }),
            Action::Cancel => Command::with_reply(|reply| Command::Cancel { id, reply }),
        };
        info!("{:?} requested for {}", action, transfer.profile_id);
        if self.commands.send(command).is_err() {
            warn!("Bridge is gone, dropping {:?}", action);
            self.last_error = Some("Sync bridge stopped".to_string());
            return;
        }
        self.pending.push((format!("{:?} {}", action, transfer.title), reply));
    }

    fn poll_replies(&mut self) {
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for (what, mut reply) in self.pending.drain(..) {
            match reply.try_recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.last_error = Some(format!("{} failed: {}", what, e)),
                Err(oneshot::error::TryRecvError::Empty) => still_pending.push((what, reply)),
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.last_error = Some(format!("{} got no answer", what));
                }
            }
        }
        self.pending = still_pending;
    }

    fn render_transfer(&self, ui: &mut egui::Ui, transfer: &Transfer) -> Option<Action> {
        let mut action = None;

        ui.horizontal(|ui| {
            ui.label(RichText::new(&transfer.title).strong());
            ui.label(RichText::new(transfer.category.as_str()).weak());
            if let Some(label) = &transfer.label {
                ui.label(RichText::new(label).italics());
            }
        });

        match transfer.state {
            TransferState::Running | TransferState::Queued => match transfer.progress {
                Some(p) => {
                    ui.add(
                        egui::ProgressBar::new(p as f32)
                            .show_percentage()
                            .animate(true),
                    );
                }
                None => {
                    ui.add(egui::Spinner::new().size(16.0));
                }
            },
            TransferState::Finished => {
                ui.label(RichText::new("Done").color(Color32::from_rgb(34, 197, 94)));
            }
            TransferState::Error => {
                let message = transfer.error.as_deref().unwrap_or("Sync failed");
                ui.label(RichText::new(message).color(Color32::from_rgb(239, 68, 68)));
            }
            TransferState::Canceled => {
                ui.label(RichText::new("Canceled").weak());
            }
        }

        ui.horizontal(|ui| {
            if ui
                .add_enabled(transfer.launch_target.is_some(), egui::Button::new("Open"))
                .clicked()
            {
                action = Some(Action::Open);
            }
            if ui
                .add_enabled(transfer.can_start(), egui::Button::new("Start"))
                .clicked()
            {
                action = Some(Action::Start);
            }
            if ui
                .add_enabled(transfer.can_cancel(), egui::Button::new("Cancel"))
                .clicked()
            {
                action = Some(Action::Cancel);
            }
            ui.add_enabled(transfer.can_pause(), egui::Button::new("Pause"))
                .on_disabled_hover_text("The sync daemon cannot pause transfers");
        });

        action
    }
}

impl eframe::App for TransferApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        while let Ok(event) = self.events.try_recv() {
            self.mirror.apply(event);
        }
        self.poll_replies();

        let mut clicked: Option<(Action, Transfer)> = None;

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading(format!("Sync ({} active)", self.mirror.active_count()));
            ui.separator();

            if self.mirror.is_empty() {
                ui.label(RichText::new("No sync activity").weak());
            }

            egui::ScrollArea::vertical().show(ui, |ui| {
                for transfer in self.mirror.iter() {
                    if let Some(action) = self.render_transfer(ui, transfer) {
                        clicked = Some((action, transfer.clone()));
                    }
                    ui.separator();
                }
            });

            if let Some(error) = &self.last_error {
                ui.label(RichText::new(error).color(Color32::from_rgb(239, 68, 68)));
            }
        });

        if let Some((action, transfer)) = clicked {
            self.send(action, &transfer);
        }

        ctx.request_repaint_after(REFRESH);
    }
}

/// Run the GUI application (synchronous version for main thread)
pub fn run_gui_sync(
    commands: mpsc::UnboundedSender<Command>,
    events: Receiver<ModelEvent>,
) -> std::result::Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([420.0, 360.0])
            .with_min_inner_size([320.0, 200.0])
            .with_title("Sync Status"),
        ..Default::default()
    };

    eframe::run_native(
        "Sync Status Bridge",
        options,
        Box::new(move |cc| Ok(Box::new(TransferApp::new(cc, commands, events)))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{StatusCode, StatusNotification};
    use crate::transfer::TransferMetadata;

    fn transfer(profile: &str) -> Transfer {
        Transfer::new(profile, TransferMetadata::default())
    }

    #[test]
    fn test_mirror_follows_events() {
        let mut mirror = TransferMirror::default();
        let mut first = transfer("p1");
        let second = transfer("p2");

        mirror.apply(ModelEvent::Added { transfer: first.clone() });
        mirror.apply(ModelEvent::Added { transfer: second.clone() });
        assert_eq!(mirror.len(), 2);
        assert_eq!(mirror.active_count(), 2);

        first.apply(&StatusNotification::new("p1", StatusCode::Done, "", 0));
        mirror.apply(ModelEvent::Changed { transfer: first.clone() });
        assert_eq!(mirror.len(), 2);
        assert_eq!(mirror.active_count(), 1);

        let order: Vec<_> = mirror.iter().map(|t| t.profile_id.as_str()).collect();
        assert_eq!(order, vec!["p1", "p2"]);

        mirror.apply(ModelEvent::Removed {
            id: second.id,
            profile_id: second.profile_id.clone(),
        });
        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror.iter().next().map(|t| t.state), Some(TransferState::Finished));
    }

    #[test]
    fn test_mirror_ignores_unknown_removal() {
        let mut mirror = TransferMirror::default();
        mirror.apply(ModelEvent::Removed {
            id: TransferId::new(),
            profile_id: "p9".into(),
        });
        assert!(mirror.is_empty());
    }
}
