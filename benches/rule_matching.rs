#![allow(clippy::all)]
//! Benchmarks for listener rule evaluation.
//!
//! Covers wildcard matching, first-match lookups over growing rule sets,
//! and default-rule fallthrough.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use http::{HeaderName, Method};
use r0n_elb::modules::actions::{
    ActionChain, FixedResponseAction, FixedResponseConfig, TerminalAction,
};
use r0n_elb::modules::rules::{
    Condition, RequestAttributes, Rule, RuleEngine, RuleSet, WildcardPattern,
};
use std::hint::black_box;
use std::sync::Arc;

fn chain(status_code: u16) -> Arc<ActionChain> {
    let action = FixedResponseAction::new(&FixedResponseConfig {
        status_code,
        content_type: Some("text/plain".to_string()),
        message_body: None,
    })
    .unwrap();
    Arc::new(ActionChain::terminal(TerminalAction::FixedResponse(action)))
}

/// Rule `i` matches host `svc{i}.example.com`, paths under `/api/v{i}/`,
/// GET or POST, and an `x-tenant` header starting with `t{i}`.
fn make_engine(count: u32) -> RuleEngine {
    let rules = (1..=count)
        .map(|i| {
            Rule::new(
                i,
                vec![
                    Condition::HostHeader(vec![
                        WildcardPattern::new(&format!("svc{i}.example.com"), true).unwrap()
                    ]),
                    Condition::PathPattern(vec![
                        WildcardPattern::new(&format!("/api/v{i}/*"), false).unwrap()
                    ]),
                    Condition::HttpRequestMethod(vec![Method::GET, Method::POST]),
                    Condition::HttpHeader {
                        name: HeaderName::from_static("x-tenant"),
                        values: vec![WildcardPattern::new(&format!("t{i}-*"), true).unwrap()],
                    },
                ],
                chain(200),
            )
            .unwrap()
        })
        .collect();
    RuleEngine::new(RuleSet::new(rules, Rule::default_rule(chain(404))).unwrap())
}

fn request(i: u32) -> RequestAttributes {
    RequestAttributes::get(&format!("/api/v{i}/users/42?expand=true"))
        .with_host(&format!("svc{i}.example.com:443"))
        .with_header("x-tenant", &format!("t{i}-blue"))
}

fn bench_wildcard(c: &mut Criterion) {
    let mut group = c.benchmark_group("rules/wildcard");

    let literal = WildcardPattern::new("/api/v1/users", false).unwrap();
    let prefix = WildcardPattern::new("/api/*", false).unwrap();
    let backtracking = WildcardPattern::new("*/users/*?", false).unwrap();
    let host = WildcardPattern::new("*.EXAMPLE.com", true).unwrap();

    group.bench_function("literal", |b| {
        b.iter(|| black_box(literal.matches(black_box("/api/v1/users"))));
    });
    group.bench_function("prefix", |b| {
        b.iter(|| black_box(prefix.matches(black_box("/api/v1/users/42/orders"))));
    });
    group.bench_function("backtracking", |b| {
        b.iter(|| black_box(backtracking.matches(black_box("/a/users/b/users/c/users/42"))));
    });
    group.bench_function("case_insensitive_host", |b| {
        b.iter(|| black_box(host.matches(black_box("Shop.Example.COM"))));
    });

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("rules/engine");

    for count in [1, 10, 50, 100] {
        let engine = make_engine(count);
        let first = request(1);
        let last = request(count);
        let miss = RequestAttributes::get("/static/app.js").with_host("cdn.example.com");

        group.bench_with_input(BenchmarkId::new("first_rule", count), &count, |b, _| {
            b.iter(|| black_box(engine.match_request(&first)));
        });
        group.bench_with_input(BenchmarkId::new("last_rule", count), &count, |b, _| {
            b.iter(|| black_box(engine.match_request(&last)));
        });
        group.bench_with_input(BenchmarkId::new("default", count), &count, |b, _| {
            b.iter(|| black_box(engine.match_request(&miss)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_wildcard, bench_engine);
criterion_main!(benches);
