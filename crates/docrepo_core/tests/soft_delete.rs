mod common;

use common::{ctx, repo, Article, Event, Note, OPERATOR};
use docrepo_core::{
    Context, Document, DocumentCollection, ErrorKind, RepoPolicy, SoftDeleteMode,
};
use serde_json::json;

#[test]
fn delete_marks_record_and_hides_it() {
    let repo = repo::<Article>("articles");
    let mut article = repo.create(&ctx(), Article::new("a", "t")).unwrap();
    let created_stamp = article.updated.updated_at;

    repo.delete(&ctx(), &mut article).unwrap();
    assert_eq!(article.deleted.deleted_by, OPERATOR);
    assert!(article.deleted.deleted_at.is_some());
    assert!(article.updated.updated_at > created_stamp);

    let err = repo.get(&ctx(), &"a".to_string()).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
    assert!(repo.find(&ctx(), Document::new()).unwrap().is_empty());

    let visible = ctx().with_soft_delete(SoftDeleteMode::Disable);
    let tombstone = repo.get(&visible, &"a".to_string()).unwrap();
    assert_eq!(tombstone.deleted, article.deleted);
    assert_eq!(repo.collection().count(&Document::new()).unwrap(), 1);
}

#[test]
fn deleting_twice_is_not_found() {
    let repo = repo::<Article>("articles");
    let mut article = repo.create(&ctx(), Article::new("a", "t")).unwrap();
    repo.delete(&ctx(), &mut article).unwrap();

    let err = repo.delete(&ctx(), &mut article).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[test]
fn soft_deleted_records_cannot_be_updated() {
    let repo = repo::<Article>("articles");
    let created = repo.create(&ctx(), Article::new("a", "t")).unwrap();
    let mut doomed = created.clone();
    repo.delete(&ctx(), &mut doomed).unwrap();

    let err = repo.update(&ctx(), doomed).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[test]
fn disabled_soft_delete_removes_physically() {
    let repo = repo::<Article>("articles")
        .with_policy(RepoPolicy::default().soft_delete(SoftDeleteMode::Disable));
    let mut article = repo.create(&ctx(), Article::new("a", "t")).unwrap();

    repo.delete(&ctx(), &mut article).unwrap();
    assert_eq!(repo.collection().count(&Document::new()).unwrap(), 0);

    let err = repo.delete(&ctx(), &mut article).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[test]
fn entity_without_delete_audit_is_removed() {
    let repo = repo::<Note>("notes");
    let mut note = repo.create(&ctx(), Note::new("n", "text")).unwrap();

    repo.delete(&ctx(), &mut note).unwrap();
    assert_eq!(repo.collection().count(&Document::new()).unwrap(), 0);
    assert!(repo
        .get(&ctx(), &"n".to_string())
        .unwrap_err()
        .is(ErrorKind::NotFound));
}

#[test]
fn millisecond_delete_audit_soft_deletes() {
    let repo = repo::<Event>("events");
    let ctx = Context::new().with_operator("clock");
    let mut event = repo
        .create(
            &ctx,
            Event {
                id: 3,
                ..Event::default()
            },
        )
        .unwrap();

    repo.delete(&ctx, &mut event).unwrap();
    assert!(event.deleted.deleted_at > 0);
    assert!(repo.get(&ctx, &3).unwrap_err().is(ErrorKind::NotFound));

    let stored = repo
        .get(&ctx.with_soft_delete(SoftDeleteMode::Disable), &3)
        .unwrap();
    assert_eq!(stored.deleted.deleted_at, event.deleted.deleted_at);
}

#[test]
fn batch_delete_soft_stamps_matches() {
    let repo = repo::<Article>("articles");
    for id in ["a", "b", "c"] {
        repo.create(&ctx(), Article::new(id, "t")).unwrap();
    }

    let removed = repo
        .batch_delete_by_ids(&ctx().with_operator("janitor"), &["a".to_string(), "b".to_string()])
        .unwrap();
    assert_eq!(removed, 2);

    let remaining: Vec<_> = repo
        .find(&ctx(), Document::new())
        .unwrap()
        .into_iter()
        .map(|article| article.id)
        .collect();
    assert_eq!(remaining, vec!["c"]);

    let visible = ctx().with_soft_delete(SoftDeleteMode::Disable);
    let tombstone = repo.get(&visible, &"a".to_string()).unwrap();
    assert_eq!(tombstone.deleted.deleted_by, "janitor");
    assert_eq!(tombstone.updated.updated_by, "janitor");
    assert!(tombstone.deleted.deleted_at.is_some());
    assert_eq!(repo.find(&visible, Document::new()).unwrap().len(), 3);

    let err = repo
        .batch_delete_by_ids(&ctx(), &["a".to_string()])
        .unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[test]
fn batch_delete_variants() {
    let repo = repo::<Note>("notes");
    let notes: Vec<_> = ["x", "y", "z"]
        .into_iter()
        .map(|id| repo.create(&ctx(), Note::new(id, id)).unwrap())
        .collect();

    assert_eq!(repo.batch_delete(&ctx(), &[]).unwrap(), 0);
    assert_eq!(repo.batch_delete_by_ids(&ctx(), &[]).unwrap(), 0);

    assert_eq!(repo.batch_delete(&ctx(), &notes[..1]).unwrap(), 1);

    let mut filter = Document::new();
    filter.insert("text".to_string(), json!({"$in": ["y", "z"]}));
    assert_eq!(repo.batch_delete_by_filter(&ctx(), filter.clone()).unwrap(), 2);
    assert_eq!(repo.collection().count(&Document::new()).unwrap(), 0);

    let err = repo.batch_delete_by_filter(&ctx(), filter).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}
