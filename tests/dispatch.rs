mod support;

use std::collections::BTreeMap;

use sluice::application::dispatch::DispatchResult;
use sluice::application::repos::BindingsRepo;
use sluice::domain::bindings::NewBinding;
use sluice::domain::content::{ContentKind, ContentSnapshot, SnapshotGraph};
use sluice::domain::hosts::HostUrls;
use sluice::domain::types::{BindType, HostId};

use support::*;

#[tokio::test]
async fn manual_purge_hits_every_locale_with_logical_host() {
    let recorder = PurgeRecorder::start().await;
    let harness = harness(
        vec![host(
            "www",
            "cache1",
            per_locale(&[
                ("en", format!("{}/en", recorder.base_url)),
                ("fr", format!("{}/fr", recorder.base_url)),
            ]),
        )],
        &["en", "fr"],
        default_settings(),
    );

    let results = harness.service.purge_uri("blog/post-1/", None).await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(DispatchResult::is_ok), "{results:?}");
    assert_eq!(
        results[0].message,
        format!("{}/en/blog/post-1 OK", recorder.base_url)
    );

    let requests = recorder.requests();
    let paths: Vec<&str> = requests.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["/en/blog/post-1", "/fr/blog/post-1"]);
    assert!(requests.iter().all(|r| r.method == "PURGE"));
    assert!(requests.iter().all(|r| r.host == "cache1"));
}

#[tokio::test]
async fn non_200_status_becomes_the_result_code() {
    let recorder = PurgeRecorder::start().await;
    let harness = harness(
        vec![host(
            "www",
            "cache1",
            HostUrls::Shared(recorder.base_url.clone()),
        )],
        &["en"],
        default_settings(),
    );

    let results = harness.service.purge_uri("/missing", None).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].code, 404);
    assert_eq!(
        results[0].message,
        format!("{}/missing Not Found", recorder.base_url)
    );
    assert_eq!(results[0].data["host"], "www");
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error_and_does_not_stop_the_batch() {
    let recorder = PurgeRecorder::start().await;
    let port = closed_port().await;
    let harness = harness(
        vec![
            host(
                "a-down",
                "cache0",
                HostUrls::Shared(format!("http://127.0.0.1:{port}")),
            ),
            host("b-up", "cache1", HostUrls::Shared(recorder.base_url.clone())),
        ],
        &["en"],
        default_settings(),
    );

    let results = harness.service.purge_uri("/news", None).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].code, DispatchResult::ERROR_CURL);
    assert!(results[0].message.contains("a-down"), "{}", results[0].message);
    assert!(results[1].is_ok());
    assert_eq!(recorder.requests().len(), 1);
}

#[tokio::test]
async fn host_filter_limits_manual_purge() {
    let recorder = PurgeRecorder::start().await;
    let harness = harness(
        vec![
            host("one", "cache1", HostUrls::Shared(recorder.base_url.clone())),
            host(
                "two",
                "cache2",
                HostUrls::Shared(format!("{}/two", recorder.base_url)),
            ),
        ],
        &["en"],
        default_settings(),
    );

    let results = harness
        .service
        .purge_uri("/", Some(HostId::new("two")))
        .await;

    assert_eq!(results.len(), 1);
    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].host, "cache2");
}

#[tokio::test]
async fn ban_authenticates_and_templates_the_expression() {
    let varnish = FakeVarnish::start("s3cret\n").await;
    let harness = harness(
        vec![with_admin(
            host("varnish1", "cache1", HostUrls::Unset),
            varnish.port,
            "s3cret\n",
        )],
        &["en"],
        default_settings(),
    );

    let results = harness
        .service
        .ban_query(r".*\.pdf", false, Some(HostId::new("varnish1")))
        .await
        .expect("bans enabled");

    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok(), "{:?}", results[0]);
    assert_eq!(
        results[0].message,
        r#"BAN "req.http.host == cache1 && req.url ~ .*\.pdf" added successfully"#
    );
    assert_eq!(
        varnish.bans(),
        [r"req.http.host == cache1 && req.url ~ .*\\.pdf"]
    );
}

#[tokio::test]
async fn rejected_ban_carries_the_remote_code() {
    let varnish = FakeVarnish::start("s3cret").await;
    let harness = harness(
        vec![with_admin(
            host("varnish1", "cache1", HostUrls::Unset),
            varnish.port,
            "s3cret",
        )],
        &["en"],
        default_settings(),
    );

    let results = harness
        .service
        .ban_query("req.url ~ syntax-error", true, None)
        .await
        .expect("bans enabled");

    assert_eq!(results[0].code, 106);
    assert_eq!(
        results[0].message,
        "Ban error: 106 - 'Syntax error\" \"near syntax-error'"
    );
    assert!(varnish.bans().is_empty());
}

#[tokio::test]
async fn wrong_secret_is_a_general_error() {
    let varnish = FakeVarnish::start("right").await;
    let harness = harness(
        vec![with_admin(
            host("varnish1", "cache1", HostUrls::Unset),
            varnish.port,
            "wrong",
        )],
        &["en"],
        default_settings(),
    );

    let results = harness
        .service
        .ban_query("req.url ~ /", true, None)
        .await
        .expect("bans enabled");

    assert_eq!(results[0].code, DispatchResult::ERROR_GENERAL);
    assert!(
        results[0].message.contains("authentication failed"),
        "{}",
        results[0].message
    );
}

#[tokio::test]
async fn ban_list_reads_admin_hosts_and_reports_failures() {
    let varnish = FakeVarnish::start("s3cret").await;
    let down = closed_port().await;
    let harness = harness(
        vec![
            with_admin(
                host("varnish1", "cache1", HostUrls::Unset),
                varnish.port,
                "s3cret",
            ),
            with_admin(host("varnish2", "cache2", HostUrls::Unset), down, "s3cret"),
            host("www", "cache3", HostUrls::Unset),
        ],
        &["en"],
        default_settings(),
    );

    harness
        .service
        .ban_query("req.url ~ /news", true, Some(HostId::new("varnish1")))
        .await
        .expect("bans enabled");

    let lists = harness.service.ban_lists(None).await;

    assert_eq!(lists.len(), 2);
    let entries = lists[0].entries.as_ref().expect("readable");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].spec, "req.url ~ /news");
    assert!(lists[1].entries.is_err());
}

#[tokio::test]
async fn change_notification_purges_and_bans_through_inline_jobs() {
    let recorder = PurgeRecorder::start().await;
    let varnish = FakeVarnish::start("s3cret").await;
    let harness = harness(
        vec![with_admin(
            host("www", "cache1", HostUrls::Shared(recorder.base_url.clone())),
            varnish.port,
            "s3cret",
        )],
        &["en"],
        default_settings(),
    );

    harness
        .store
        .replace_bindings(
            5,
            BTreeMap::from([(
                2,
                vec![
                    NewBinding {
                        type_id: 2,
                        bind_type: BindType::Purge,
                        query: "/feed".to_string(),
                    },
                    NewBinding {
                        type_id: 2,
                        bind_type: BindType::Ban,
                        query: r".*\.pdf".to_string(),
                    },
                    NewBinding {
                        type_id: 2,
                        bind_type: BindType::FullBan,
                        query: "req.url ~ ^/archive".to_string(),
                    },
                ],
            )]),
        )
        .await
        .expect("bindings stored");
    harness
        .service
        .record_uri(7, "blog/old-slug", None)
        .await
        .expect("uri recorded");

    let item = ContentSnapshot::new(
        7,
        ContentKind::Entry {
            section_id: Some(5),
            type_id: Some(2),
        },
    )
    .with_uri("blog/post-1");

    let queued = harness
        .service
        .on_change(&[item], &SnapshotGraph, None, false)
        .await
        .expect("change accepted");

    assert_eq!(queued.jobs.len(), 2);

    let mut paths: Vec<String> = recorder.requests().into_iter().map(|r| r.path).collect();
    paths.sort();
    assert_eq!(paths, ["/blog/old-slug", "/blog/post-1", "/feed"]);

    // Both bans travel over one admin connection.
    assert_eq!(varnish.connections(), 1);
    assert_eq!(
        varnish.bans(),
        [
            r"req.http.host == cache1 && req.url ~ .*\\.pdf",
            "req.url ~ ^/archive",
        ]
    );
}

#[tokio::test]
async fn change_notification_runs_on_a_spawned_task() {
    let recorder = PurgeRecorder::start().await;
    let harness = harness(
        vec![host(
            "www",
            "cache1",
            HostUrls::Shared(recorder.base_url.clone()),
        )],
        &["en"],
        default_settings(),
    );
    let service = harness.service.clone();
    let item = ContentSnapshot::new(
        9,
        ContentKind::Entry {
            section_id: None,
            type_id: None,
        },
    )
    .with_uri("news/launch");

    let queued = tokio::spawn(async move {
        service
            .on_change(&[item], &SnapshotGraph, None, false)
            .await
    })
    .await
    .expect("task joined")
    .expect("change accepted");

    assert_eq!(queued.jobs.len(), 1);
    let paths: Vec<String> = recorder.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, ["/news/launch"]);
}

#[tokio::test]
async fn multi_line_ban_cannot_smuggle_a_second_command() {
    let varnish = FakeVarnish::start("s3cret").await;
    let harness = harness(
        vec![with_admin(
            host("varnish1", "cache1", HostUrls::Unset),
            varnish.port,
            "s3cret",
        )],
        &["en"],
        default_settings(),
    );

    let smuggled = harness
        .service
        .ban_query("req.url ~ a\nban.list", true, None)
        .await
        .expect("bans enabled");
    let rejected = harness
        .service
        .ban_query("req.url ~ syntax-error", true, None)
        .await
        .expect("bans enabled");

    assert_eq!(smuggled[0].code, DispatchResult::ERROR_GENERAL);
    assert!(smuggled[0].message.contains("single line"));
    assert_eq!(rejected[0].code, 106);
    assert!(varnish.bans().is_empty());
    assert_eq!(varnish.connections(), 1);
}

#[tokio::test]
async fn closed_admin_connection_is_reopened_within_a_batch() {
    let varnish = FakeVarnish::start_with("s3cret", Some(1)).await;
    let harness = harness(
        vec![with_admin(
            host("www", "cache1", HostUrls::Unset),
            varnish.port,
            "s3cret",
        )],
        &["en"],
        default_settings(),
    );

    harness
        .store
        .replace_bindings(
            5,
            BTreeMap::from([(
                2,
                ["req.url ~ ^/a", "req.url ~ ^/b", "req.url ~ ^/c"]
                    .into_iter()
                    .map(|query| NewBinding {
                        type_id: 2,
                        bind_type: BindType::FullBan,
                        query: query.to_string(),
                    })
                    .collect(),
            )]),
        )
        .await
        .expect("bindings stored");
    let item = ContentSnapshot::new(
        7,
        ContentKind::Entry {
            section_id: Some(5),
            type_id: Some(2),
        },
    );

    harness
        .service
        .on_change(&[item], &SnapshotGraph, None, false)
        .await
        .expect("change accepted");

    // The first connection closes after one reply; the unanswered ban drops
    // the session and the next one reconnects.
    assert_eq!(varnish.bans(), ["req.url ~ ^/a", "req.url ~ ^/c"]);
    assert_eq!(varnish.connections(), 2);
}
