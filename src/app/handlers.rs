//! Key handlers.

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::{
    events::Screen,
    input::{InputBoxState, InputCallbackId},
    shortcuts::matches_shortcut,
    worker::WorkerCmd,
};

use super::App;

/// Handle one key press; `true` means quit.
pub async fn handle_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // An open popup captures every key, shortcuts included.
    if app.input_box.is_some() {
        return handle_input_box_key(app, k).await;
    }

    match app.ui.screen {
        Screen::Main => handle_main_key(app, k).await,
        Screen::Branding => handle_branding_key(app, k).await,
    }
}

pub fn is_ctrl_c(k: &KeyEvent) -> bool {
    k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c')
}

async fn handle_main_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.main;

    if matches_shortcut(&k, &sc.quit) {
        return Ok(true);
    } else if matches_shortcut(&k, &sc.refresh) {
        // Re-read the property list; pending rows reconcile against it.
        app.request_refresh().await?;
    } else if matches_shortcut(&k, &sc.new_property) {
        // The worker gets the address once the popup is confirmed.
        app.input_box = Some(InputBoxState::new(
            "Property address:",
            "",
            InputCallbackId::NewPropertyAddress,
        ));
    } else if matches_shortcut(&k, &sc.generate) {
        start_generation(app).await?;
    } else if matches_shortcut(&k, &sc.branding) {
        // Edit copies; the config only changes on save.
        app.reload_branding_buffers();
        app.ui.screen = Screen::Branding;
        app.ui.status = "Branding".into();
    } else if matches_shortcut(&k, &sc.open_pdf) {
        open_report(app);
    } else if matches_shortcut(&k, &sc.down) {
        // Rows are server properties followed by optimistic ones.
        if app.ui.selected + 1 < app.rows().len() {
            app.ui.selected += 1;
        }
    } else if matches_shortcut(&k, &sc.up) {
        app.ui.selected = app.ui.selected.saturating_sub(1);
    }

    Ok(false)
}

async fn start_generation(app: &mut App) -> Result<()> {
    let Some(property) = app.selected_property() else {
        app.ui.status = "No property selected".into();
        return Ok(());
    };
    if property.optimistic {
        // The row is local until the server lists it.
        app.ui.status = "Property is still being created".into();
        return Ok(());
    }
    // Duplicate runs for one property are refused by the worker.
    app.worker_tx
        .send(WorkerCmd::GenerateReport {
            property_id: property.id.clone(),
        })
        .await?;
    app.ui.error = None;
    app.ui.status = format!("Generating report for {}...", property.address_common_name);
    Ok(())
}

fn open_report(app: &mut App) {
    let Some(property) = app.selected_property() else {
        return;
    };
    // Latest finished flow first, then a completed tracked job.
    match app.pdf_url_for(&property.id) {
        Some(url) => match webbrowser::open(&url) {
            Ok(()) => app.ui.status = format!("Opened {url}"),
            Err(e) => {
                tracing::warn!("failed to open {url}: {e}");
                app.ui.error = Some(format!("could not open browser: {e}"));
            }
        },
        None => app.ui.status = "No report available for this property yet".into(),
    }
}

async fn handle_branding_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.branding;

    if matches_shortcut(&k, &sc.cancel) {
        // Drop unsaved edits.
        app.reload_branding_buffers();
        app.ui.screen = Screen::Main;
    } else if matches_shortcut(&k, &sc.save) {
        // Written to config.toml and forwarded to the worker for later requests.
        app.cfg.branding.company_name = app.company_name.trim().to_string();
        app.cfg.branding.company_logo_url = app.company_logo_url.trim().to_string();
        app.cfg.save(&app.cfg_path)?;
        app.worker_tx
            .send(WorkerCmd::SaveSettings(app.cfg.clone()))
            .await?;
        tracing::info!("branding saved");
        app.ui.screen = Screen::Main;
        app.ui.status = "Saved branding".into();
    } else if matches_shortcut(&k, &sc.company_name) {
        app.input_box = Some(InputBoxState::new(
            "Company name:",
            &app.company_name,
            InputCallbackId::BrandingCompanyName,
        ));
    } else if matches_shortcut(&k, &sc.logo_url) {
        app.input_box = Some(InputBoxState::new(
            "Company logo URL:",
            &app.company_logo_url,
            InputCallbackId::BrandingLogoUrl,
        ));
    }

    Ok(false)
}

async fn handle_input_box_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.input_box;
    let Some(input) = app.input_box.as_mut() else {
        return Ok(false);
    };

    // Ctrl+C still quits while typing.
    if is_ctrl_c(&k) {
        return Ok(true);
    }

    if matches_shortcut(&k, &sc.confirm) {
        // The popup closes before the value is applied.
        let value = input.value.clone();
        let callback_id = input.callback_id;
        app.input_box = None;
        apply_input(app, callback_id, value).await?;
    } else if matches_shortcut(&k, &sc.cancel) {
        app.input_box = None;
    } else if matches_shortcut(&k, &sc.backspace) {
        input.backspace();
    } else if matches_shortcut(&k, &sc.delete) {
        input.delete();
    } else if matches_shortcut(&k, &sc.left) {
        input.move_left();
    } else if matches_shortcut(&k, &sc.right) {
        input.move_right();
    } else if matches_shortcut(&k, &sc.home) {
        input.move_home();
    } else if matches_shortcut(&k, &sc.end) {
        input.move_end();
    } else if matches_shortcut(&k, &sc.clear_line) {
        input.clear_line();
    } else if let KeyCode::Char(c) = k.code
        && !k.modifiers.contains(KeyModifiers::CONTROL)
    {
        input.insert_char(c);
    }

    Ok(false)
}

async fn apply_input(app: &mut App, callback_id: InputCallbackId, value: String) -> Result<()> {
    match callback_id {
        InputCallbackId::NewPropertyAddress => {
            // Blank addresses never reach the server.
            if value.trim().is_empty() {
                app.ui.status = "Address is empty; nothing created".into();
                return Ok(());
            }
            app.worker_tx
                .send(WorkerCmd::CreateProperty {
                    address_common_name: value,
                })
                .await?;
            app.ui.status = "Creating property...".into();
        }
        // Branding edits stay in the buffers until saved.
        InputCallbackId::BrandingCompanyName => app.company_name = value,
        InputCallbackId::BrandingLogoUrl => app.company_logo_url = value,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, jobs::Property, shortcuts::Shortcuts, worker::WorkerEvent};
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn app() -> (App, mpsc::Receiver<WorkerCmd>) {
        let (tx, rx) = mpsc::channel(8);
        let (_etx, erx) = mpsc::channel(8);
        let app = App::new(
            PathBuf::from("config.toml"),
            Config::default(),
            Shortcuts::default(),
            tx,
            erx,
        );
        (app, rx)
    }

    fn press(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::empty())
    }

    fn enter() -> KeyEvent {
        KeyEvent::new(KeyCode::Enter, KeyModifiers::empty())
    }

    #[tokio::test]
    async fn typed_address_becomes_create_command() {
        let (mut app, mut rx) = app();
        handle_key(&mut app, press('n')).await.unwrap();
        for c in "5 Bay Rd".chars() {
            handle_key(&mut app, press(c)).await.unwrap();
        }
        handle_key(&mut app, enter()).await.unwrap();

        assert!(app.input_box.is_none());
        match rx.try_recv().unwrap() {
            WorkerCmd::CreateProperty {
                address_common_name,
            } => assert_eq!(address_common_name, "5 Bay Rd"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn generate_targets_selected_server_row_only() {
        let (mut app, mut rx) = app();
        app.handle_worker_event(WorkerEvent::PropertiesLoaded(vec![Property {
            id: "p1".into(),
            ..Property::default()
        }]));
        app.handle_worker_event(WorkerEvent::PendingChanged(vec![
            crate::jobs::PendingJob::new("1 New St".into()),
        ]));

        handle_key(&mut app, press('g')).await.unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            WorkerCmd::GenerateReport { property_id } if property_id == "p1"
        ));

        handle_key(&mut app, press('j')).await.unwrap();
        assert_eq!(app.ui.selected, 1);
        handle_key(&mut app, press('g')).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(app.ui.status, "Property is still being created");
    }

    #[tokio::test]
    async fn branding_cancel_discards_edits() {
        let (mut app, _rx) = app();
        handle_key(&mut app, press('b')).await.unwrap();
        assert_eq!(app.ui.screen, Screen::Branding);
        handle_key(&mut app, press('c')).await.unwrap();
        handle_key(&mut app, press('X')).await.unwrap();
        handle_key(&mut app, enter()).await.unwrap();
        assert_eq!(app.company_name, "X");

        handle_key(&mut app, KeyEvent::new(KeyCode::Esc, KeyModifiers::empty()))
            .await
            .unwrap();
        assert_eq!(app.ui.screen, Screen::Main);
        assert_eq!(app.company_name, "");
    }

    #[tokio::test]
    async fn quit_key_only_outside_input() {
        let (mut app, _rx) = app();
        handle_key(&mut app, press('n')).await.unwrap();
        assert!(!handle_key(&mut app, press('q')).await.unwrap());
        assert_eq!(app.input_box.as_ref().unwrap().value, "q");
    }
}
