//! Command-line parsing into options.

use std::path::PathBuf;

use ftpserver::auth::AuthenticationMode;
use ftpserver::config::schema::BackendKind;
use ftpserver::layout::LayoutMode;
use ftpserver::lifecycle::AppContext;
use ftpserver::registry::BackendSelection;

mod common;

#[test]
fn every_authentication_combination_sets_matching_flags() {
    let tokens = [
        ("custom", AuthenticationMode::CUSTOM),
        ("anonymous", AuthenticationMode::ANONYMOUS),
        ("pam", AuthenticationMode::PAM),
    ];

    for mask in 1u8..8 {
        let mut args = Vec::new();
        let mut expected = AuthenticationMode::NONE;
        for (index, (token, flag)) in tokens.iter().enumerate() {
            if mask & (1 << index) != 0 {
                args.extend(["-a", *token]);
                expected |= *flag;
            }
        }
        args.push("unix");

        let options = common::options_from(&args).unwrap();
        assert_eq!(options.authentication, expected, "args: {:?}", args);
    }
}

#[test]
fn authentication_defaults_to_custom() {
    let options = common::options_from(&["in-memory"]).unwrap();
    assert_eq!(options.authentication, AuthenticationMode::CUSTOM);
}

#[test]
fn every_layout_token_maps_to_its_mode() {
    let layouts = [
        ("default", LayoutMode::SingleRoot),
        ("single-root", LayoutMode::SingleRoot),
        ("root-per-user", LayoutMode::RootPerUser),
        ("pam-home", LayoutMode::PamHome),
        ("pam-home-chroot", LayoutMode::PamHomeChroot),
    ];

    for (token, expected) in layouts {
        let options = common::options_from(&["--layout", token, "unix"]).unwrap();
        assert_eq!(options.layout, expected, "layout {}", token);
    }
}

#[test]
fn auth_and_layout_combine() {
    let options = common::options_from(&["-a", "anonymous", "-a", "custom", "-l", "root-per-user", "in-memory"]).unwrap();
    assert_eq!(options.authentication, AuthenticationMode::ANONYMOUS | AuthenticationMode::CUSTOM);
    assert_eq!(options.layout, LayoutMode::RootPerUser);
}

#[test]
fn invalid_tokens_fail_fast() {
    assert!(common::options_from(&["-a", "kerberos", "unix"]).is_err());
    assert!(common::options_from(&["--layout", "flat", "unix"]).is_err());
}

#[test]
fn system_io_without_argument_uses_temp_directory() {
    let options = common::options_from(&["system-io"]).unwrap();
    let ctx = AppContext::from_options(options).unwrap();
    assert_eq!(
        ctx.selection,
        BackendSelection::SystemIo {
            root: std::env::temp_dir().join("TestFtpServer")
        }
    );
}

#[test]
fn system_io_argument_is_used_verbatim() {
    let options = common::options_from(&["system-io", "relative/dir/../x"]).unwrap();
    let ctx = AppContext::from_options(options).unwrap();
    assert_eq!(
        ctx.selection,
        BackendSelection::SystemIo {
            root: PathBuf::from("relative/dir/../x")
        }
    );
}

#[test]
fn google_drive_user_needs_exactly_two_arguments() {
    assert!(common::options_from(&["google-drive", "user"]).is_err());
    assert!(common::options_from(&["google-drive", "user", "secrets.json"]).is_err());
    assert!(common::options_from(&["google-drive", "user", "secrets.json", "me", "extra"]).is_err());

    let options = common::options_from(&["google-drive", "user", "secrets.json", "me", "--refresh"]).unwrap();
    assert_eq!(options.backend, BackendKind::GoogleDriveUser);
    assert_eq!(options.google_drive.user.user_name.as_deref(), Some("me"));
    assert!(options.google_drive.user.refresh);
}

#[test]
fn google_drive_service_needs_exactly_one_argument() {
    assert!(common::options_from(&["google-drive", "service"]).is_err());
    assert!(common::options_from(&["google-drive", "service", "key.json", "extra"]).is_err());

    let options = common::options_from(&["google-drive", "service", "key.json", "--background-upload"]).unwrap();
    let ctx = AppContext::from_options(options).unwrap();
    assert!(matches!(
        ctx.selection,
        BackendSelection::GoogleDriveService { background_upload: true, .. }
    ));
}

#[test]
fn parse_errors_are_usage_errors() {
    let err = common::options_from(&["google-drive", "service"]).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn implicit_without_certificate_is_rejected_before_startup() {
    let options = common::options_from(&["--implicit", "in-memory"]).unwrap();
    let err = AppContext::from_options(options).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn implicit_tls_moves_the_default_port() {
    let options = common::options_from(&["--implicit", "-c", "server.pem", "unix"]).unwrap();
    assert_eq!(options.server.effective_port(options.tls.implicit), 990);

    let options = common::options_from(&["--implicit", "-c", "server.pem", "-p", "2990", "unix"]).unwrap();
    assert_eq!(options.server.effective_port(options.tls.implicit), 2990);
}

#[test]
fn long_flags_accept_equals_syntax() {
    let options = common::options_from(&["--authentication=anonymous", "--layout=root-per-user", "unix"]).unwrap();
    assert_eq!(options.authentication, AuthenticationMode::ANONYMOUS);
    assert_eq!(options.layout, LayoutMode::RootPerUser);

    assert!(common::options_from(&["--authentication=bogus", "unix"]).is_err());
}
