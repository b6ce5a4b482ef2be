mod common;

use common::{ctx_as, repo, Article, Counter, Note};
use docrepo_core::{
    Context, ContextField, DataIsolation, Document, ErrorKind, RepoError, RepoPolicy,
};

fn ids(articles: Vec<Article>) -> Vec<String> {
    articles.into_iter().map(|article| article.id).collect()
}

#[test]
fn tenant_isolation_scopes_reads_and_writes() {
    let repo = repo::<Article>("articles")
        .with_policy(RepoPolicy::default().isolation(DataIsolation::Tenant));
    let alpha = ctx_as("ann", "alpha", "app");
    let beta = ctx_as("bob", "beta", "app");

    repo.create(&alpha, Article::new("a1", "alpha doc")).unwrap();
    let foreign = repo.create(&beta, Article::new("b1", "beta doc")).unwrap();

    assert_eq!(ids(repo.find(&alpha, Document::new()).unwrap()), vec!["a1"]);
    assert_eq!(ids(repo.find(&beta, Document::new()).unwrap()), vec!["b1"]);

    let err = repo.get(&alpha, &"b1".to_string()).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));

    let mut hijack = foreign.clone();
    hijack.title = "hijacked".to_string();
    let err = repo.update(&alpha, hijack).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));

    let mut target = foreign;
    let err = repo.delete(&alpha, &mut target).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
    assert_eq!(repo.get(&beta, &"b1".to_string()).unwrap().title, "beta doc");
}

#[test]
fn fresh_upsert_cannot_take_over_another_tenants_record() {
    let repo = repo::<Article>("articles")
        .with_policy(RepoPolicy::default().isolation(DataIsolation::Tenant));
    let alpha = ctx_as("ann", "alpha", "app");
    let beta = ctx_as("bob", "beta", "app");
    repo.create(&beta, Article::new("a", "beta doc")).unwrap();

    let err = repo
        .upsert(&alpha, Article::new("a", "clobbered"))
        .unwrap_err();
    assert!(err.is(ErrorKind::Conflict));

    let kept = repo.get(&beta, &"a".to_string()).unwrap();
    assert_eq!(kept.title, "beta doc");
    assert_eq!(kept.scope.tenant_id, "beta");
    assert!(repo.get(&alpha, &"a".to_string()).unwrap_err().is(ErrorKind::NotFound));

    let replaced = repo.upsert(&beta, Article::new("a", "beta v2")).unwrap();
    assert_eq!(replaced.scope.tenant_id, "beta");
    assert_eq!(repo.get(&beta, &"a".to_string()).unwrap().title, "beta v2");
}

#[test]
fn app_isolation_scopes_by_app_id() {
    let repo = repo::<Article>("articles")
        .with_policy(RepoPolicy::default().isolation(DataIsolation::App));
    let web = ctx_as("ann", "shared", "web");
    let mobile = ctx_as("ann", "shared", "mobile");

    repo.create(&web, Article::new("w", "t")).unwrap();
    repo.create(&mobile, Article::new("m", "t")).unwrap();

    assert_eq!(ids(repo.find(&web, Document::new()).unwrap()), vec!["w"]);
    let page = repo
        .page_query(&mobile, docrepo_core::PageQueryInput::default())
        .unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(page.rows[0].id, "m");
}

#[test]
fn user_isolation_scopes_by_creator() {
    let repo = repo::<Note>("notes")
        .with_policy(RepoPolicy::default().isolation(DataIsolation::User));
    let ann = Context::new().with_operator("ann");
    let bob = Context::new().with_operator("bob");

    repo.create(&ann, Note::new("n1", "ann's")).unwrap();
    repo.create(&bob, Note::new("n2", "bob's")).unwrap();

    let visible: Vec<_> = repo
        .find(&bob, Document::new())
        .unwrap()
        .into_iter()
        .map(|note| note.id)
        .collect();
    assert_eq!(visible, vec!["n2"]);
    assert_eq!(repo.batch_delete_by_ids(&bob, &["n1".to_string(), "n2".to_string()]).unwrap(), 1);
    assert!(repo.get(&ann, &"n1".to_string()).is_ok());
}

#[test]
fn isolation_identity_must_be_present() {
    let repo = repo::<Article>("articles")
        .with_policy(RepoPolicy::default().isolation(DataIsolation::Tenant));
    let err = repo
        .find(&Context::new().with_operator("ann"), Document::new())
        .unwrap_err();
    assert!(matches!(err, RepoError::MissingContext(ContextField::TenantId)));
}

#[test]
fn isolation_without_capability_is_ignored() {
    let repo = repo::<Counter>("counters")
        .with_policy(RepoPolicy::default().isolation(DataIsolation::Tenant));
    repo.create(&Context::new(), Counter { id: 1, value: 1 }).unwrap();
    assert_eq!(repo.find(&Context::new(), Document::new()).unwrap().len(), 1);
}

#[test]
fn context_can_lift_isolation() {
    let repo = repo::<Article>("articles")
        .with_policy(RepoPolicy::default().isolation(DataIsolation::Tenant));
    repo.create(&ctx_as("ann", "alpha", "app"), Article::new("a", "t"))
        .unwrap();
    repo.create(&ctx_as("bob", "beta", "app"), Article::new("b", "t"))
        .unwrap();

    let admin = ctx_as("root", "alpha", "app").with_isolation(DataIsolation::None);
    assert_eq!(ids(repo.find(&admin, Document::new()).unwrap()), vec!["a", "b"]);
}
