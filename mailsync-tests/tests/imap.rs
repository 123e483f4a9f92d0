use std::{sync::Arc, time::Duration};

use concat_with::concat_line;
use mailsync::{
    backend::{Backend, BackendBuilder},
    config::SyncConfig,
    entity::{label, EmailAddress, Message, MessageUpdate},
    event::{Action, Refresh},
    imap::{self, Credentials, ImapConfig, ImapEncryptionKind, ImapWatchConfig},
    user::UserId,
    AnyError, Error,
};
use mailsync_testing_server::{with_imap_testing_server, ImapTestingServer};
use tokio::time::sleep;

const LOGIN: &str = "alice";
const PASSWORD: &str = "password";

fn backend(server: &ImapTestingServer) -> Backend {
    let config = ImapConfig {
        host: "localhost".into(),
        port: 143,
        encryption: Some(ImapEncryptionKind::None),
        mailbox: None,
        watch: Some(ImapWatchConfig {
            quiescence: Some(2),
            poll_interval: Some(1),
            idle_renew: Some(60),
            reconnect_delay: Some(5),
        }),
    };

    BackendBuilder::new(SyncConfig::default())
        .with_imap(config, Arc::new(server.clone()))
        .build()
}

async fn login(backend: &Backend) -> UserId {
    let user = UserId::from(LOGIN);
    backend
        .login(&user, Credentials::new(LOGIN, PASSWORD))
        .await
        .unwrap();
    user
}

fn raw_message(subject: &str) -> String {
    concat_line!(
        "From: bob@localhost",
        "To: alice@localhost",
        "Subject: SUBJECT",
        "",
        "Hello, world!"
    )
    .replace("SUBJECT", subject)
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_push_while_idling() {
    with_imap_testing_server(LOGIN, PASSWORD, |server| async move {
        let backend = backend(&server);
        let user = login(&backend).await;
        let start = backend.events().get_last_event(&user).await;

        // let the session enter the idle mode
        sleep(Duration::from_secs(5)).await;
        assert!(server.idle_commands(LOGIN) > 0);

        let uid = server.deliver(LOGIN, "INBOX", raw_message("pushed"));

        let event = backend.get_events_after(&user, &start.id).await.unwrap();

        assert_eq!(event.messages.len(), 1);
        assert_eq!(event.messages[0].action(), Action::Create);
        let message = event.messages[0].entity().unwrap();
        assert_eq!(message.id, uid.to_string());
        assert_eq!(message.subject, "pushed");
        assert_eq!(message.sender, EmailAddress::from("bob@localhost"));
        assert_eq!(message.label_ids, vec![label::INBOX]);
        assert!(message.unread);

        assert_eq!(event.conversations.len(), 1);
        assert_eq!(event.conversations[0].action(), Action::Create);

        let inbox = event
            .message_counts
            .iter()
            .find(|count| count.label_id == label::INBOX)
            .unwrap();
        assert_eq!(inbox.total, 1);

        // exactly one event per pushed message
        sleep(Duration::from_secs(5)).await;
        let last = backend.events().get_last_event(&user).await;
        assert_eq!(last.id, event.id);
    })
    .await
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_push_after_quiescence() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let backend = backend(&server);
    let user = login(&backend).await;
    let start = backend.events().get_last_event(&user).await;

    // delivered before the session enters the idle mode
    let uid = server.deliver(LOGIN, "INBOX", raw_message("early"));
    assert_eq!(server.idle_commands(LOGIN), 0);

    let event = backend.get_events_after(&user, &start.id).await.unwrap();

    assert_eq!(event.messages.len(), 1);
    assert_eq!(event.messages[0].action(), Action::Create);
    assert_eq!(event.messages[0].id(), uid.to_string());
    assert_eq!(event.messages[0].entity().unwrap().subject, "early");
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_external_message_delivered_before_append() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let backend = backend(&server);
    let user = login(&backend).await;
    let start = backend.events().get_last_event(&user).await;

    let external = server.deliver(LOGIN, "INBOX", raw_message("external"));

    let message = Message {
        subject: "appended".into(),
        sender: EmailAddress::from("alice@localhost"),
        body: "Hello, world!".into(),
        ..Default::default()
    };
    let appended = backend
        .messages()
        .insert_message(&user, message)
        .await
        .unwrap();
    assert!(appended.id.parse::<u32>().unwrap() > external);

    sleep(Duration::from_secs(30)).await;

    let event = backend.get_events_after(&user, &start.id).await.unwrap();

    let mut ids: Vec<_> = event
        .messages
        .iter()
        .map(|delta| {
            assert_eq!(delta.action(), Action::Create);
            delta.id().to_owned()
        })
        .collect();
    ids.sort();

    let mut expected = vec![external.to_string(), appended.id.clone()];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failed_fetch_after_append_is_pushed() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let backend = backend(&server);
    let user = login(&backend).await;

    sleep(Duration::from_secs(5)).await;
    let start = backend.events().get_last_event(&user).await;

    server.fail_next_fetches(LOGIN, 1);

    let message = Message {
        subject: "appended".into(),
        sender: EmailAddress::from("alice@localhost"),
        body: "Hello, world!".into(),
        ..Default::default()
    };
    let err = backend
        .messages()
        .insert_message(&user, message)
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_any().downcast_ref::<imap::Error>(),
        Some(imap::Error::ExecuteCommandError(..))
    ));

    // the message is in the mailbox, the idle mode pushes it
    let uids = server.uids(LOGIN, "INBOX");
    assert_eq!(uids.len(), 1);

    let event = backend.get_events_after(&user, &start.id).await.unwrap();
    assert_eq!(event.messages.len(), 1);
    assert_eq!(event.messages[0].action(), Action::Create);
    assert_eq!(event.messages[0].id(), uids[0].to_string());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_missing_uid_next_does_not_push_existing_messages() {
    let server = ImapTestingServer::new()
        .with_user(LOGIN, PASSWORD)
        .hide_uid_next();
    server.deliver(LOGIN, "INBOX", raw_message("first"));
    server.deliver(LOGIN, "INBOX", raw_message("second"));

    let backend = backend(&server);
    let user = login(&backend).await;
    let start = backend.events().get_last_event(&user).await;

    sleep(Duration::from_secs(5)).await;
    let uid = server.deliver(LOGIN, "INBOX", raw_message("third"));

    let event = backend.get_events_after(&user, &start.id).await.unwrap();
    assert_eq!(event.messages.len(), 1);
    assert_eq!(event.messages[0].id(), uid.to_string());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_concurrent_logins_keep_one_session() {
    let server = ImapTestingServer::new()
        .with_user(LOGIN, PASSWORD)
        .with_connect_delay(Duration::from_secs(1));
    let backend = backend(&server);
    let user = UserId::from(LOGIN);

    let (first, second) = tokio::join!(
        backend.login(&user, Credentials::new(LOGIN, PASSWORD)),
        backend.login(&user, Credentials::new(LOGIN, PASSWORD)),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(server.connects(LOGIN), 2);
    assert_eq!(server.live_connections(LOGIN), 1);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(server.live_connections(LOGIN), 1);
    assert_eq!(server.idle_commands(LOGIN), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_user_operations_cancel_idle_mode() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let backend = backend(&server);
    let user = login(&backend).await;

    sleep(Duration::from_secs(5)).await;
    let idle_commands = server.idle_commands(LOGIN);
    assert!(idle_commands > 0);

    // the testing server rejects commands sent while idling
    let messages = backend.messages().list_messages(&user).await.unwrap();
    assert!(messages.is_empty());

    // the idle mode resumes after a new quiescence window
    sleep(Duration::from_secs(5)).await;
    assert!(server.idle_commands(LOGIN) > idle_commands);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_appended_message_is_not_pushed_twice() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let backend = backend(&server);
    let user = login(&backend).await;

    sleep(Duration::from_secs(5)).await;

    let message = Message {
        subject: "appended".into(),
        sender: EmailAddress::from("alice@localhost"),
        to_list: vec![EmailAddress::from("bob@localhost")],
        body: "Hello, world!".into(),
        unread: false,
        ..Default::default()
    };

    let message = backend
        .messages()
        .insert_message(&user, message)
        .await
        .unwrap();
    assert_eq!(message.subject, "appended");
    assert!(!message.unread);

    let uid: u32 = message.id.parse().unwrap();
    assert_eq!(server.flags(LOGIN, "INBOX", uid), vec![imap::SEEN]);

    let inserted = backend.events().get_last_event(&user).await;
    assert_eq!(inserted.messages.len(), 1);
    assert_eq!(inserted.messages[0].action(), Action::Create);

    // the notice of the appended message is received while idling,
    // but the message is already known
    let event = backend.get_events_after(&user, &inserted.id).await.unwrap();
    assert_eq!(event.id, inserted.id);
    assert!(event.is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_update_and_delete_message() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let uid = server.deliver(LOGIN, "INBOX", raw_message("existing"));
    let backend = backend(&server);
    let user = login(&backend).await;
    let id = uid.to_string();

    let update = MessageUpdate::new(&id)
        .with_unread(false)
        .with_label_ids([label::INBOX, label::STARRED]);
    let message = backend.messages().update_message(&user, update).await.unwrap();

    assert!(!message.unread);
    assert!(message.is_starred());
    assert!(server.flags(LOGIN, "INBOX", uid).contains(&imap::FLAGGED.to_owned()));

    let event = backend.events().get_last_event(&user).await;
    assert_eq!(event.messages[0].action(), Action::Update);

    let update = MessageUpdate::new(&id).with_subject("renamed");
    let err = backend
        .messages()
        .update_message(&user, update)
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_any().downcast_ref::<imap::Error>(),
        Some(imap::Error::UpdateMessageFieldsError(_))
    ));

    backend.messages().delete_message(&user, &id).await.unwrap();
    assert!(server.uids(LOGIN, "INBOX").is_empty());

    let event = backend.events().get_last_event(&user).await;
    assert_eq!(event.messages[0].action(), Action::Delete);
    assert_eq!(event.conversations[0].action(), Action::Delete);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_delete_only_expunges_target_message() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let other = server.deliver(LOGIN, "INBOX", raw_message("other"));
    let target = server.deliver(LOGIN, "INBOX", raw_message("target"));
    let backend = backend(&server);
    let user = login(&backend).await;

    // flagged as deleted by another client, but not expunged yet
    server.add_flag(LOGIN, "INBOX", other, imap::DELETED);

    backend
        .messages()
        .delete_message(&user, &target.to_string())
        .await
        .unwrap();

    assert_eq!(server.uids(LOGIN, "INBOX"), vec![other]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_reconnect_and_retry_once() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    server.deliver(LOGIN, "INBOX", raw_message("existing"));
    let backend = backend(&server);
    let user = login(&backend).await;
    assert_eq!(server.connects(LOGIN), 1);

    server.drop_connections(LOGIN);

    let messages = backend.messages().list_messages(&user).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(server.connects(LOGIN), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_persistent_failure_returns_original_error() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let backend = backend(&server);
    let user = login(&backend).await;

    server.drop_connections(LOGIN);
    server.fail_next_connects(LOGIN, usize::MAX);

    let err = backend
        .messages()
        .list_messages(&user)
        .await
        .unwrap_err();

    let err = err.as_any().downcast_ref::<imap::Error>().unwrap();
    assert!(err.is_connection_closed());
    assert_eq!(server.connects(LOGIN), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_refresh_after_idle_reconnection() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let backend = backend(&server);
    let user = login(&backend).await;
    let start = backend.events().get_last_event(&user).await;

    sleep(Duration::from_secs(5)).await;
    server.drop_connections(LOGIN);

    let event = backend.get_events_after(&user, &start.id).await.unwrap();
    assert!(event.refresh.contains(Refresh::MAIL));
    assert!(event.messages.is_empty());
    assert_eq!(server.connects(LOGIN), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_idle_renewal() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let backend = backend(&server);
    login(&backend).await;

    sleep(Duration::from_secs(5)).await;
    assert_eq!(server.idle_commands(LOGIN), 1);

    sleep(Duration::from_secs(200)).await;
    assert!(server.idle_commands(LOGIN) >= 4);
    assert_eq!(server.connects(LOGIN), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_delete_all_events_tears_down_session() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let backend = backend(&server);
    let user = login(&backend).await;
    assert_eq!(server.live_connections(LOGIN), 1);

    backend.delete_all_events(&user).await.unwrap();
    assert_eq!(server.live_connections(LOGIN), 0);

    let err = backend.messages().list_messages(&user).await.unwrap_err();
    assert!(matches!(
        err.as_any().downcast_ref::<imap::Error>(),
        Some(imap::Error::SessionUnavailableError(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_invalid_credentials() {
    let server = ImapTestingServer::new().with_user(LOGIN, PASSWORD);
    let backend = backend(&server);
    let user = UserId::from(LOGIN);

    let err = backend
        .login(&user, Credentials::new(LOGIN, "wrong"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::ImapError(imap::Error::LoginError(..))
    ));
    assert!(backend.imap().unwrap().session(&user).await.is_err());
}
