use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use catalog_sync_core::contract::{
    Existence, ImportError, Importer, MockRepositoryClient, MockVisibilityStore, RepoError,
};
use catalog_sync_core::importer::RepoImporter;
use catalog_sync_core::model::{
    ImportPolicy, PackageDescriptor, PackageId, PackageKind, PrerequisiteGroup,
};

fn pkg(id: PackageId, kind: PackageKind) -> PackageDescriptor {
    PackageDescriptor::new(id, format!("pkg-{id}"), kind)
}

fn policy() -> ImportPolicy {
    ImportPolicy::default()
}

fn importer(repo: MockRepositoryClient, dir: &std::path::Path) -> RepoImporter {
    RepoImporter::new(Arc::new(repo), None, dir.to_path_buf())
}

#[tokio::test]
async fn publish_conflict_falls_back_to_revise_once() {
    let dir = tempdir().unwrap();
    let id = PackageId::new();

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence()
        .returning(|_, _| Ok(Existence::NotFound));
    repo.expect_publish()
        .times(1)
        .returning(|_| Err(RepoError::Conflict));
    repo.expect_revise().times(1).returning(|_| Ok(()));

    let importer = importer(repo, dir.path());
    let stats = importer
        .import_from_catalog("Dell", &[pkg(id, PackageKind::Ordinary)], &policy())
        .await
        .unwrap();

    assert_eq!(stats.total, 1);
    assert_eq!(stats.success, 1);
}

#[tokio::test]
async fn revise_failure_after_conflict_is_terminal_for_the_package() {
    let dir = tempdir().unwrap();
    let id = PackageId::new();

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence()
        .returning(|_, _| Ok(Existence::NotFound));
    repo.expect_publish()
        .times(1)
        .returning(|_| Err(RepoError::Conflict));
    // Exactly one revise attempt; no second publish, no retry loop.
    repo.expect_revise()
        .times(1)
        .returning(|_| Err(RepoError::Other("store offline".into())));

    let importer = importer(repo, dir.path());
    let stats = importer
        .import_from_catalog("Dell", &[pkg(id, PackageKind::Ordinary)], &policy())
        .await
        .unwrap();

    assert_eq!(stats.total, 1);
    assert_eq!(stats.failure, 1);
}

#[tokio::test]
async fn existing_package_is_revised_not_published() {
    let dir = tempdir().unwrap();
    let id = PackageId::new();

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence()
        .returning(|_, _| Ok(Existence::Exists));
    repo.expect_revise().times(1).returning(|_| Ok(()));
    repo.expect_publish().never();

    let importer = importer(repo, dir.path());
    let stats = importer
        .import_from_catalog("Dell", &[pkg(id, PackageKind::Ordinary)], &policy())
        .await
        .unwrap();

    assert_eq!(stats.success, 1);
}

#[tokio::test]
async fn unsatisfied_prerequisites_refuse_publish() {
    let dir = tempdir().unwrap();
    // The prerequisite is not part of the snapshot and does not exist
    // remotely either, so the dependent package must be refused without a
    // publish attempt.
    let missing = PackageId::new();
    let mut dependent = pkg(PackageId::new(), PackageKind::Ordinary);
    dependent
        .prerequisites
        .push(PrerequisiteGroup::single(missing));

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence()
        .returning(|_, _| Ok(Existence::NotFound));
    repo.expect_publish().never();
    repo.expect_revise().never();

    let importer = importer(repo, dir.path());
    let stats = importer
        .import_from_catalog("Dell", &[dependent], &policy())
        .await
        .unwrap();

    assert_eq!(stats.total, 1);
    assert_eq!(stats.failure, 1);
}

#[tokio::test]
async fn one_satisfied_group_is_enough() {
    let dir = tempdir().unwrap();
    let missing = PackageId::new();
    let present = PackageId::new();
    let mut dependent = pkg(PackageId::new(), PackageKind::Ordinary);
    dependent
        .prerequisites
        .push(PrerequisiteGroup::single(missing));
    dependent
        .prerequisites
        .push(PrerequisiteGroup::single(present));
    let dependent_id = dependent.id;

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence()
        .returning(move |id, _| {
            if id == present {
                Ok(Existence::Exists)
            } else {
                Ok(Existence::NotFound)
            }
        });
    repo.expect_publish()
        .times(1)
        .withf(move |a| a.id == dependent_id)
        .returning(|_| Ok(()));

    let importer = importer(repo, dir.path());
    let stats = importer
        .import_from_catalog("Dell", &[dependent], &policy())
        .await
        .unwrap();

    assert_eq!(stats.success, 1);
}

#[tokio::test]
async fn detectoid_existence_is_checked_with_detectoid_kind() {
    let dir = tempdir().unwrap();
    let d = PackageId::new();

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence()
        .withf(move |id, kind| *id == d && *kind == PackageKind::Detectoid)
        .returning(|_, _| Ok(Existence::NotFound));
    repo.expect_publish().returning(|_| Ok(()));

    let importer = importer(repo, dir.path());
    let stats = importer
        .import_from_catalog("Dell", &[pkg(d, PackageKind::Detectoid)], &policy())
        .await
        .unwrap();

    assert_eq!(stats.success, 1);
}

#[tokio::test]
async fn visibility_is_marked_on_fresh_publish_only() {
    let dir = tempdir().unwrap();
    let fresh = PackageId::new();
    let existing = PackageId::new();

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence().returning(move |id, _| {
        if id == existing {
            Ok(Existence::Exists)
        } else {
            Ok(Existence::NotFound)
        }
    });
    repo.expect_publish().returning(|_| Ok(()));
    repo.expect_revise().returning(|_| Ok(()));

    let mut visibility = MockVisibilityStore::new();
    visibility
        .expect_mark_visible()
        .times(1)
        .withf(move |id| *id == fresh)
        .returning(|_| Ok(()));

    let importer = RepoImporter::new(
        Arc::new(repo),
        Some(Arc::new(visibility)),
        dir.path().to_path_buf(),
    );
    let policy = ImportPolicy {
        update_visibility_store: true,
        ..ImportPolicy::default()
    };
    let stats = importer
        .import_from_catalog(
            "Dell",
            &[
                pkg(fresh, PackageKind::Ordinary),
                pkg(existing, PackageKind::Ordinary),
            ],
            &policy,
        )
        .await
        .unwrap();

    assert_eq!(stats.success, 2);
}

#[tokio::test]
async fn temporary_artifacts_are_cleaned_up_either_way() {
    let dir = tempdir().unwrap();
    let ok = PackageId::new();
    let bad = PackageId::new();

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence()
        .returning(|_, _| Ok(Existence::NotFound));
    repo.expect_publish().returning(move |a| {
        if a.id == bad {
            Err(RepoError::Other("rejected".into()))
        } else {
            Ok(())
        }
    });

    let importer = importer(repo, dir.path());
    let stats = importer
        .import_from_catalog(
            "Dell",
            &[
                pkg(ok, PackageKind::Ordinary),
                pkg(bad, PackageKind::Ordinary),
            ],
            &policy(),
        )
        .await
        .unwrap();

    assert_eq!(stats.success, 1);
    assert_eq!(stats.failure, 1);
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 0, "no .sdp temporaries may survive the pass");
}

#[tokio::test]
async fn publish_order_respects_dependency_chain() {
    let dir = tempdir().unwrap();
    let (a, b, c) = (PackageId::new(), PackageId::new(), PackageId::new());
    let pa = pkg(a, PackageKind::Ordinary);
    let mut pb = pkg(b, PackageKind::Ordinary);
    pb.prerequisites.push(PrerequisiteGroup::single(a));
    let mut pc = pkg(c, PackageKind::Ordinary);
    pc.bundle = vec![b];

    let published: Arc<Mutex<Vec<PackageId>>> = Arc::new(Mutex::new(Vec::new()));
    let log = published.clone();

    let mut repo = MockRepositoryClient::new();
    // Everything already published counts as an existing prerequisite, so
    // the chain keeps itself satisfied as it goes.
    let seen = published.clone();
    repo.expect_check_existence().returning(move |id, _| {
        if seen.lock().unwrap().contains(&id) {
            Ok(Existence::Exists)
        } else {
            Ok(Existence::NotFound)
        }
    });
    repo.expect_publish().returning(move |artifact| {
        log.lock().unwrap().push(artifact.id);
        Ok(())
    });

    let importer = importer(repo, dir.path());
    let stats = importer
        .import_from_catalog("Dell", &[pc, pb, pa], &policy())
        .await
        .unwrap();

    assert_eq!(stats.success, 3);
    let order = published.lock().unwrap().clone();
    assert_eq!(order, vec![a, b, c]);
}

#[tokio::test]
async fn single_detectoid_catalog_publishes_detectoid_first() {
    let dir = tempdir().unwrap();
    let d = PackageId::new();
    let mut descriptors = vec![pkg(d, PackageKind::Detectoid)];
    for _ in 0..1000 {
        let mut p = pkg(PackageId::new(), PackageKind::Ordinary);
        p.prerequisites.push(PrerequisiteGroup::single(d));
        descriptors.push(p);
    }

    let published: Arc<Mutex<Vec<PackageId>>> = Arc::new(Mutex::new(Vec::new()));
    let log = published.clone();

    let mut repo = MockRepositoryClient::new();
    let seen = published.clone();
    repo.expect_check_existence().returning(move |id, _| {
        if seen.lock().unwrap().contains(&id) {
            Ok(Existence::Exists)
        } else {
            Ok(Existence::NotFound)
        }
    });
    repo.expect_publish().returning(move |artifact| {
        log.lock().unwrap().push(artifact.id);
        Ok(())
    });

    let importer = importer(repo, dir.path());
    let stats = importer
        .import_from_catalog("Dell", &descriptors, &policy())
        .await
        .unwrap();

    assert_eq!(stats.total, 1001);
    assert_eq!(stats.success, 1001);
    let order = published.lock().unwrap().clone();
    assert_eq!(order[0], d, "detectoid must be published before the batch");
    assert_eq!(order.len(), 1001);
}

#[tokio::test]
async fn cycle_fails_the_whole_pass_before_any_repository_call() {
    let dir = tempdir().unwrap();
    let (a, b) = (PackageId::new(), PackageId::new());
    let mut pa = pkg(a, PackageKind::Ordinary);
    pa.prerequisites.push(PrerequisiteGroup::single(b));
    let mut pb = pkg(b, PackageKind::Ordinary);
    pb.prerequisites.push(PrerequisiteGroup::single(a));

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence().never();
    repo.expect_publish().never();

    let importer = importer(repo, dir.path());
    let err = importer
        .import_from_catalog("Dell", &[pa, pb], &policy())
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Cycle(_)));
}

#[tokio::test]
async fn retract_deletes_dependents_before_dependencies() {
    let dir = tempdir().unwrap();
    let (a, b) = (PackageId::new(), PackageId::new());
    let pa = pkg(a, PackageKind::Ordinary);
    let mut pb = pkg(b, PackageKind::Ordinary);
    pb.prerequisites.push(PrerequisiteGroup::single(a));

    let deleted: Arc<Mutex<Vec<PackageId>>> = Arc::new(Mutex::new(Vec::new()));
    let log = deleted.clone();

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence()
        .returning(|_, _| Ok(Existence::Exists));
    repo.expect_delete().returning(move |id| {
        log.lock().unwrap().push(id);
        Ok(())
    });

    let importer = importer(repo, dir.path());
    let stats = importer
        .retract_from_catalog("Dell", &[pa, pb], &policy())
        .await
        .unwrap();

    assert_eq!(stats.success, 2);
    assert_eq!(deleted.lock().unwrap().clone(), vec![b, a]);
}

#[tokio::test]
async fn deleting_absent_package_is_success_without_delete_call() {
    let dir = tempdir().unwrap();
    let a = PackageId::new();

    let mut repo = MockRepositoryClient::new();
    repo.expect_check_existence()
        .returning(|_, _| Ok(Existence::NotFound));
    repo.expect_delete().never();

    let importer = importer(repo, dir.path());
    let stats = importer
        .retract_from_catalog("Dell", &[pkg(a, PackageKind::Ordinary)], &policy())
        .await
        .unwrap();

    assert_eq!(stats.success, 1);
}
