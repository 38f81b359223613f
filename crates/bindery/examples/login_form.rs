//! Bindery Login Form Example
//!
//! Drives a headless login form through the full stack:
//! - Observables bound to a derived "can submit" flag
//! - An async command bound weakly to its view model
//! - Tasks persisting the session token to storage
//!
//! Run with: RUST_LOG=bindery_core=debug cargo run -p bindery --example login_form

use std::sync::Arc;
use std::time::Duration;

use bindery::storage::{MemoryStore, Storage};
use bindery::{AsyncCommand, CommandBuilder, DispatchQueue, Exception, Observable, Task};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Session {
    user: String,
    token: String,
}

#[derive(Debug, Clone)]
struct Form {
    user: String,
    password: String,
}

/// View model backing the form
struct LoginViewModel {
    form: Observable<Form>,
    can_submit: Arc<Observable<bool>>,
    status: Observable<String>,
    storage: Storage<MemoryStore>,
    network: DispatchQueue,
}

impl LoginViewModel {
    fn new() -> Arc<Self> {
        let model = Arc::new(Self {
            form: Observable::new(Form {
                user: String::new(),
                password: String::new(),
            }),
            can_submit: Arc::new(Observable::new(false)),
            status: Observable::new("idle".to_string()),
            storage: Storage::new(MemoryStore::new(), &DispatchQueue::serial("storage")),
            network: DispatchQueue::concurrent("network"),
        });
        model
            .form
            .bind(&model.can_submit, |form| !form.user.is_empty() && form.password.len() >= 8);
        model
    }

    /// Pretend to authenticate against a server
    fn authenticate(&self, form: Form) -> Task<Session> {
        Task::new(&self.network, move || {
            tracing::info!(target: "login_form", user = %form.user, "authenticating");
            std::thread::sleep(Duration::from_millis(50));
            if form.password == "correct horse" {
                Ok(Session {
                    token: format!("token-for-{}", form.user),
                    user: form.user,
                })
            } else {
                tracing::warn!(target: "login_form", user = %form.user, "rejected credentials");
                Err(Exception::new("invalid credentials"))
            }
        })
    }

    fn login_command(model: &Arc<Self>, ui: &DispatchQueue) -> AsyncCommand<(), Session> {
        CommandBuilder::new("login")
            .execute_on(&DispatchQueue::serial("login"))
            .callback_on(ui)
            .task_with_source(
                model,
                |model, _| model.can_submit.get(),
                |model, _| {
                    let storage = model.storage.clone();
                    model.authenticate(model.form.get()).and_then(move |session| {
                        storage
                            .set("session", session.clone())
                            .map(move |()| session)
                    })
                },
            )
    }
}

struct Screen;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ui = DispatchQueue::main();
    let model = LoginViewModel::new();
    let screen = Arc::new(Screen);

    model.status.notify(&screen, Some(ui), |_, status| {
        println!("[ui] status: {status}");
    });
    model.can_submit.notify(&screen, Some(ui), |_, enabled| {
        println!("[ui] login button enabled: {enabled}");
    });

    let login = LoginViewModel::login_command(&model, ui);
    println!("can execute before typing: {}", login.can_execute(&()));

    model.form.set(Form {
        user: "ada".into(),
        password: "wrong password".into(),
    });
    let failed = login
        .execute(())
        .ok_or("login rejected")?
        .on_fail(ui, |err| {
            if err.mark_handled() {
                println!("[ui] alert: {err}");
            }
        })
        .wait();
    model.status.set(format!("first attempt failed: {}", failed.is_err()));

    model.form.set(Form {
        user: "ada".into(),
        password: "correct horse".into(),
    });
    let session = login.execute(()).ok_or("login rejected")?.wait()?;
    tracing::info!(target: "login_form", user = %session.user, "signed in");
    model.status.set(format!("signed in as {}", session.user));

    let stored = model.storage.get::<Session>("session").wait()?;
    println!("stored token: {}", stored.token);

    // The command never keeps its view model alive
    drop(model);
    let err = login.execute(()).ok_or("login rejected")?.wait().unwrap_err();
    tracing::info!(target: "login_form", error = %err, "login after teardown");
    println!("after teardown: {err}");

    ui.dispatch_sync(|| ());
    Ok(())
}
