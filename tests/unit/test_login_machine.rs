//! Unit tests for the login state machine

use mudprod::terminal::login::{LoginAction, LoginMachine};
use mudprod::{LoginConfig, LoginStep};

fn two_step() -> LoginMachine {
    LoginMachine::new(&LoginConfig::with_steps(vec![
        LoginStep::new("name", "alice"),
        LoginStep::new("password", "secret"),
    ]))
    .unwrap()
}

#[cfg(test)]
mod login_machine_tests {
    use super::*;

    #[test]
    fn test_full_login() {
        let mut machine = two_step();
        assert_eq!(machine.current_step(), Some(0));
        assert_eq!(
            machine.on_output("By what Name do you wish to be known? "),
            LoginAction::Send("alice".to_string())
        );
        assert_eq!(machine.current_step(), Some(1));
        assert_eq!(machine.on_output("Password: "), LoginAction::Send("secret".to_string()));
        assert_eq!(machine.current_step(), None);
        assert_eq!(machine.replies_sent(), 2);
        assert_eq!(machine.on_output("Welcome back!\n> "), LoginAction::Succeeded);
        assert!(machine.is_finished());
    }

    #[test]
    fn test_waits_for_cue() {
        let mut machine = two_step();
        assert_eq!(machine.on_output("Loading the world..."), LoginAction::Wait);
        assert_eq!(machine.on_output("\nYour na"), LoginAction::Wait);
        assert_eq!(machine.on_output("me? "), LoginAction::Send("alice".to_string()));
    }

    #[test]
    fn test_cue_ignores_text_before_previous_reply() {
        let mut machine = LoginMachine::new(&LoginConfig::with_steps(vec![
            LoginStep::new("name", "alice"),
            LoginStep::new("name", "again"),
        ]))
        .unwrap();
        assert_eq!(machine.on_output("name?"), LoginAction::Send("alice".to_string()));
        assert_eq!(machine.on_output(""), LoginAction::Wait);
        assert_eq!(machine.on_output("Confirm name?"), LoginAction::Send("again".to_string()));
    }

    #[test]
    fn test_cue_through_color_codes() {
        let mut machine = two_step();
        assert_eq!(
            machine.on_output("\x1b[1;33mNa\x1b[0mme: "),
            LoginAction::Send("alice".to_string())
        );
    }

    #[test]
    fn test_failure_before_first_reply_ignored() {
        let mut machine = two_step();
        assert_eq!(
            machine.on_output("Invalid characters are not allowed. Name: "),
            LoginAction::Send("alice".to_string())
        );
    }

    #[test]
    fn test_failure_after_reply() {
        let mut machine = two_step();
        machine.on_output("Name: ");
        assert!(matches!(
            machine.on_output("Invalid name, try again."),
            LoginAction::Failed(_)
        ));
        assert!(machine.is_finished());
    }

    #[test]
    fn test_failure_in_verdict() {
        let mut machine = two_step();
        machine.on_output("Name: ");
        machine.on_output("Password: ");
        assert!(matches!(
            machine.on_output("Password incorrect."),
            LoginAction::Failed(_)
        ));
    }

    #[test]
    fn test_step_timeout_names_cue() {
        let mut machine = two_step();
        match machine.on_timeout() {
            LoginAction::Failed(reason) => assert!(reason.contains("name")),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_verdict_timeout() {
        let mut strict = LoginMachine::new(&LoginConfig::default()).unwrap();
        assert!(matches!(strict.on_timeout(), LoginAction::Failed(_)));

        let lenient = LoginConfig {
            success_patterns: Vec::new(),
            ..LoginConfig::default()
        };
        let mut lenient = LoginMachine::new(&lenient).unwrap();
        assert_eq!(lenient.on_timeout(), LoginAction::Succeeded);
    }

    #[test]
    fn test_no_steps_goes_straight_to_verdict() {
        let mut machine = LoginMachine::new(&LoginConfig::default()).unwrap();
        assert_eq!(machine.current_step(), None);
        assert_eq!(machine.on_output("Exits: north south"), LoginAction::Succeeded);
    }

    #[test]
    fn test_invalid_cue_rejected() {
        let config = LoginConfig::with_steps(vec![LoginStep::new("(", "x")]);
        assert!(LoginMachine::new(&config).is_err());
    }
}
