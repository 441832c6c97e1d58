use crate::cascade::{CacheSignal, OperatingMode};

use super::*;

#[test]
fn defaults_resolve_to_file_backend_and_minutely_schedule() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(
        settings.queue.backend,
        QueueBackend::File {
            directory: PathBuf::from(DEFAULT_QUEUE_DIRECTORY)
        }
    );
    assert_eq!(settings.scheduler.expression, "0 * * * * *");
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.cascade.queue_key(), "cascade_queue");
    assert_eq!(settings.cascade.mode, OperatingMode::Auto);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.queue.backend = Some("file".to_string());

    let overrides = Overrides {
        log_level: Some("debug".to_string()),
        queue_backend: Some("memory".to_string()),
        queue_key: Some("staging_queue".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.queue.backend, QueueBackend::Memory);
    assert_eq!(settings.cascade.queue_key(), "staging_queue");
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_overrides(&Overrides {
        log_json: Some(true),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn postgres_backend_requires_database_url() {
    let mut raw = RawSettings::default();
    raw.queue.backend = Some("postgres".to_string());

    let err = Settings::from_raw(raw.clone()).expect_err("missing url must fail");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "queue.database_url",
            ..
        }
    ));

    raw.queue.database_url = Some("postgres://localhost/cascade".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(matches!(
        settings.queue.backend,
        QueueBackend::Postgres { max_connections, .. } if max_connections.get() == 4
    ));
}

#[test]
fn unknown_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.queue.backend = Some("redis".to_string());

    let err = Settings::from_raw(raw).expect_err("unknown backend must fail");
    assert!(err.to_string().contains("unknown backend `redis`"));
}

#[test]
fn invalid_schedule_is_rejected() {
    let mut raw = RawSettings::default();
    raw.apply_run_overrides(&RunArgs {
        schedule: Some("whenever".to_string()),
    });

    let err = Settings::from_raw(raw).expect_err("invalid cron must fail");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "scheduler.schedule",
            ..
        }
    ));
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_command_is_none() {
    let args = CliArgs::parse_from(["cache-cascade"]);
    assert!(args.command.is_none());
    assert!(args.config_file.is_none());
}

#[test]
fn parse_run_arguments() {
    let args = CliArgs::parse_from([
        "cache-cascade",
        "run",
        "--schedule",
        "*/30 * * * * *",
        "--queue-backend",
        "memory",
    ]);

    match args.command {
        Some(Command::Run(run)) => {
            assert_eq!(run.schedule.as_deref(), Some("*/30 * * * * *"));
        }
        other => panic!("unexpected command: {other:?}"),
    }
    assert_eq!(args.overrides.queue_backend.as_deref(), Some("memory"));
}

#[test]
fn parse_dispatch_arguments() {
    let args = CliArgs::parse_from(["cache-cascade", "dispatch", "deployment/complete"]);
    match args.command {
        Some(Command::Dispatch(dispatch)) => {
            assert_eq!(dispatch.signal, CacheSignal::DeploymentComplete);
        }
        other => panic!("unexpected command: {other:?}"),
    }

    let args = CliArgs::parse_from(["cache-cascade", "dispatch", "clear_all"]);
    assert!(matches!(
        args.command,
        Some(Command::Dispatch(DispatchArgs {
            signal: CacheSignal::ClearAll
        }))
    ));
}

#[test]
fn dispatch_rejects_unknown_signal() {
    let result = CliArgs::try_parse_from(["cache-cascade", "dispatch", "post/created"]);
    assert!(result.is_err());
}

#[test]
fn parse_maintenance_commands() {
    for (name, expected) in [("process", "Process"), ("status", "Status"), ("clear", "Clear")] {
        let args = CliArgs::parse_from(["cache-cascade", name]);
        let command = args.command.expect("command");
        assert_eq!(format!("{command:?}"), expected);
    }
}
