mod common;

use common::{ctx, repo, Article};
use docrepo_core::{Context, ErrorKind, Repo, RepoError, RepoResult};
use std::sync::Mutex;

fn retitle(repo: &dyn Repo<Article>, ctx: &Context, id: &str, title: &str) -> RepoResult<Article> {
    let mut article = repo.get(ctx, &id.to_string())?;
    article.title = title.to_string();
    repo.update(ctx, article)
}

/// Serves one fixed article and refuses every write with a conflict.
struct StaleRepo {
    article: Article,
    calls: Mutex<Vec<&'static str>>,
}

impl StaleRepo {
    fn record(&self, op: &'static str) {
        self.calls.lock().unwrap().push(op);
    }

    fn refuse<R>(&self, op: &'static str) -> RepoResult<R> {
        self.record(op);
        Err(RepoError::Conflict("stale".to_string()))
    }
}

impl Repo<Article> for StaleRepo {
    fn get(&self, _ctx: &Context, id: &String) -> RepoResult<Article> {
        self.record("get");
        if *id == self.article.id {
            Ok(self.article.clone())
        } else {
            Err(RepoError::NotFound)
        }
    }

    fn create(&self, _ctx: &Context, _entity: Article) -> RepoResult<Article> {
        self.refuse("create")
    }

    fn update(&self, _ctx: &Context, _entity: Article) -> RepoResult<Article> {
        self.refuse("update")
    }

    fn upsert(&self, _ctx: &Context, _entity: Article) -> RepoResult<Article> {
        self.refuse("upsert")
    }

    fn patch(&self, _ctx: &Context, _entity: &mut Article) -> RepoResult<()> {
        self.refuse("patch")
    }

    fn delete(&self, _ctx: &Context, _entity: &mut Article) -> RepoResult<()> {
        self.refuse("delete")
    }

    fn batch_create(&self, _ctx: &Context, _entities: Vec<Article>) -> RepoResult<Vec<Article>> {
        self.refuse("batch_create")
    }

    fn batch_update(&self, _ctx: &Context, _entities: Vec<Article>) -> RepoResult<Vec<Article>> {
        self.refuse("batch_update")
    }

    fn batch_delete(&self, _ctx: &Context, _entities: &[Article]) -> RepoResult<u64> {
        self.refuse("batch_delete")
    }

    fn batch_delete_by_ids(&self, _ctx: &Context, _ids: &[String]) -> RepoResult<u64> {
        self.refuse("batch_delete_by_ids")
    }
}

#[test]
fn service_runs_against_document_repository() {
    let repo = repo::<Article>("articles");
    let created = Repo::create(&repo, &ctx(), Article::new("a", "draft")).unwrap();

    let renamed = retitle(&repo, &ctx(), "a", "final").unwrap();
    assert_eq!(renamed.title, "final");
    assert_eq!(renamed.created, created.created);
    assert!(renamed.updated.updated_at > created.updated.updated_at);

    let err = retitle(&repo, &ctx(), "missing", "x").unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[test]
fn service_surfaces_errors_from_substituted_repository() {
    let stale = StaleRepo {
        article: Article::new("a", "draft"),
        calls: Mutex::new(Vec::new()),
    };

    let err = retitle(&stale, &ctx(), "a", "final").unwrap_err();
    assert!(err.is(ErrorKind::Conflict));
    assert_eq!(*stale.calls.lock().unwrap(), vec!["get", "update"]);

    let err = retitle(&stale, &ctx(), "b", "final").unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
    assert_eq!(stale.calls.lock().unwrap().len(), 3);
}

#[test]
fn batch_operations_through_trait_object() {
    let concrete = repo::<Article>("articles");
    let repo: &dyn Repo<Article> = &concrete;

    let created = repo
        .batch_create(
            &ctx(),
            vec![Article::new("x", "1"), Article::new("y", "2"), Article::new("z", "3")],
        )
        .unwrap();
    assert_eq!(created.len(), 3);

    let mut edited = created.clone();
    for article in &mut edited {
        article.views = 1;
    }
    let updated = repo.batch_update(&ctx(), edited).unwrap();
    assert!(updated.iter().all(|article| article.views == 1));

    assert_eq!(repo.batch_delete(&ctx(), &updated[..1]).unwrap(), 1);
    assert_eq!(
        repo.batch_delete_by_ids(&ctx(), &["y".to_string(), "z".to_string()])
            .unwrap(),
        2
    );
    assert!(repo.get(&ctx(), &"y".to_string()).unwrap_err().is(ErrorKind::NotFound));
}
