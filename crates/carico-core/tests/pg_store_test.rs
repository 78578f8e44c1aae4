//! Plan service tests against PostgreSQL.
//!
//! Each test creates an isolated temporary database in the shared
//! container.

use std::sync::Arc;

use sqlx::PgPool;

use carico_core::catalog::{CatalogView, CourseId, import_catalog, parse_catalog_toml};
use carico_core::service::PlanService;
use carico_core::store::{PgPlanStore, PlanStore};
use carico_core::validator::{PlanRules, Rejection};
use carico_core::{PlanError, PlanType};
use carico_db::queries::{students, study_plan};
use carico_test_utils::{
    create_test_db, drop_test_db, pg_url, seed_course, seed_incompatibility, seed_student,
};

fn ids(list: &[&str]) -> Vec<CourseId> {
    list.iter().map(|id| CourseId::parse(id).unwrap()).collect()
}

fn service(pool: &PgPool) -> PlanService {
    PlanService::new(
        Arc::new(PgPlanStore::new(pool.clone())),
        PlanRules::default(),
    )
}

async fn seed_catalog(pool: &PgPool) {
    seed_course(pool, "CS10001", 7, Some(1), None).await;
    seed_course(pool, "CS20002", 6, None, Some("CS10001")).await;
    seed_course(pool, "IN10001", 6, None, None).await;
    seed_course(pool, "IN10002", 6, None, None).await;
    seed_incompatibility(pool, "IN10001", "IN10002").await;
    for n in 1..=6 {
        seed_course(pool, &format!("MA1000{n}"), 10, None, None).await;
    }
}

#[tokio::test]
async fn catalog_view_reads_enrollment_and_symmetric_incompatibilities() {
    let (pool, db_name) = create_test_db().await;
    seed_catalog(&pool).await;
    let student = seed_student(&pool, "ada@example.org").await;
    study_plan::insert_course(&pool, student, "MA10001")
        .await
        .unwrap();

    let store = PgPlanStore::new(pool.clone());
    let ma = store
        .get_course(&CourseId::parse("MA10001").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ma.signed_up, 1);

    let in2 = store
        .get_course(&CourseId::parse("IN10002").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(in2.incompatibilities.contains(&CourseId::parse("IN10001").unwrap()));

    let cs2 = store
        .get_course(&CourseId::parse("CS20002").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cs2.prerequisite, Some(CourseId::parse("CS10001").unwrap()));

    assert!(
        store
            .get_course(&CourseId::parse("ZZ99999").unwrap())
            .await
            .unwrap()
            .is_none()
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn proposal_is_committed_atomically() {
    let (pool, db_name) = create_test_db().await;
    seed_catalog(&pool).await;
    let student = seed_student(&pool, "ada@example.org").await;
    let svc = service(&pool);

    svc.propose_plan(student, PlanType::PartTime, &ids(&["MA10001", "MA10002"]))
        .await
        .unwrap();
    let accepted = svc
        .propose_plan(
            student,
            PlanType::FullTime,
            &ids(&[
                "MA10001", "MA10002", "MA10003", "MA10004", "MA10005", "MA10006",
            ]),
        )
        .await
        .unwrap();
    assert_eq!(accepted.cfu_total, 60);

    let row = students::get_student(&pool, student)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.plan_type, Some(PlanType::FullTime));
    assert_eq!(
        study_plan::get_plan(&pool, student).await.unwrap().len(),
        6
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn rejected_proposal_restores_type_and_plan() {
    let (pool, db_name) = create_test_db().await;
    seed_catalog(&pool).await;
    let student = seed_student(&pool, "ada@example.org").await;
    let svc = service(&pool);

    svc.propose_plan(student, PlanType::PartTime, &ids(&["MA10001", "MA10002"]))
        .await
        .unwrap();
    let err = svc
        .propose_plan(
            student,
            PlanType::FullTime,
            &ids(&["MA10003", "IN10001", "IN10002"]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.rejection(),
        Some(Rejection::Incompatible { .. })
    ));

    let plan = svc.study_plan(student).await.unwrap();
    assert_eq!(plan.plan_type, Some(PlanType::PartTime));
    assert_eq!(plan.courses, ids(&["MA10001", "MA10002"]).into_iter().collect());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn writer_dropped_without_commit_discards_changes() {
    let (pool, db_name) = create_test_db().await;
    seed_catalog(&pool).await;
    let student = seed_student(&pool, "ada@example.org").await;
    study_plan::insert_course(&pool, student, "MA10001")
        .await
        .unwrap();
    let store = PgPlanStore::new(pool.clone());

    {
        let mut writer = store.begin().await.unwrap();
        writer.lock_student(student).await.unwrap();
        writer.erase_plan(student).await.unwrap();
        writer
            .insert_course(student, &CourseId::parse("MA10002").unwrap())
            .await
            .unwrap();
    }

    assert_eq!(
        study_plan::get_plan(&pool, student).await.unwrap(),
        vec!["MA10001".to_string()]
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn unknown_course_insert_is_reported() {
    let (pool, db_name) = create_test_db().await;
    seed_catalog(&pool).await;
    let student = seed_student(&pool, "ada@example.org").await;
    let store = PgPlanStore::new(pool.clone());

    let mut writer = store.begin().await.unwrap();
    let err = writer
        .insert_course(student, &CourseId::parse("ZZ99999").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, carico_core::store::StoreError::UnknownCourse(_)));
    drop(writer);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn last_seat_goes_to_exactly_one_student() {
    let (pool, db_name) = create_test_db().await;
    seed_catalog(&pool).await;
    let ada = seed_student(&pool, "ada@example.org").await;
    let bob = seed_student(&pool, "bob@example.org").await;
    let svc = Arc::new(service(&pool));

    // CS10001 has a single seat; both proposals pass validation on their own.
    let plan = ids(&["CS10001", "MA10001", "MA10002"]);
    let (ra, rb) = tokio::join!(
        svc.propose_plan(ada, PlanType::PartTime, &plan),
        svc.propose_plan(bob, PlanType::PartTime, &plan),
    );

    let outcomes = [ra, rb];
    let committed = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(committed, 1, "{outcomes:?}");
    let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(
        loser.rejection(),
        Some(&Rejection::Full(CourseId::parse("CS10001").unwrap()))
    );

    let cs = svc
        .course(&CourseId::parse("CS10001").unwrap())
        .await
        .unwrap();
    assert_eq!(cs.signed_up, 1);

    // The loser keeps no plan and no type.
    let loser_id = if outcomes[0].is_err() { ada } else { bob };
    let plan = svc.study_plan(loser_id).await.unwrap();
    assert_eq!(plan.plan_type, None);
    assert!(plan.courses.is_empty());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn erase_entirely_clears_type_and_courses() {
    let (pool, db_name) = create_test_db().await;
    seed_catalog(&pool).await;
    let student = seed_student(&pool, "ada@example.org").await;
    let svc = service(&pool);

    svc.propose_plan(student, PlanType::PartTime, &ids(&["MA10001", "MA10002"]))
        .await
        .unwrap();
    svc.erase_plan_entirely(student).await.unwrap();

    let plan = svc.study_plan(student).await.unwrap();
    assert_eq!(plan.plan_type, None);
    assert!(plan.courses.is_empty());

    let err = svc.erase_plan_entirely(student + 100).await.unwrap_err();
    assert!(matches!(err, PlanError::StudentNotFound(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn imported_catalog_is_visible_to_the_engine() {
    let (pool, db_name) = create_test_db().await;
    let courses = parse_catalog_toml(
        r#"
        [[courses]]
        id = "CS20002"
        name = "Operating Systems"
        cfu = 6
        preparatory = "CS10001"
        incompatible_with = ["CS30003"]

        [[courses]]
        id = "CS10001"
        name = "Algorithms"
        cfu = 7
        max_students = 3

        [[courses]]
        id = "CS30003"
        name = "Systems Programming"
        cfu = 6
        "#,
    )
    .unwrap();

    let imported = import_catalog(&pool, &courses).await.unwrap();
    assert_eq!(imported, 3);

    let listed = PgPlanStore::new(pool.clone()).list_courses().await.unwrap();
    let names: Vec<&str> = listed.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        ["Algorithms", "Operating Systems", "Systems Programming"]
    );
    assert!(
        listed[2]
            .incompatibilities
            .contains(&CourseId::parse("CS20002").unwrap())
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn mutation_lock_excludes_other_pools() {
    let (pool, db_name) = create_test_db().await;
    seed_catalog(&pool).await;
    let ada = seed_student(&pool, "ada@example.org").await;

    // A second pool stands in for another carico process.
    let other_pool = PgPool::connect(&format!("{}/{db_name}", pg_url().await))
        .await
        .unwrap();
    let other = service(&other_pool);

    let held = PgPlanStore::new(pool.clone())
        .lock_student_mutation(ada)
        .await
        .unwrap();
    let plan = ids(&["MA10001", "MA10002"]);
    let blocked = tokio::time::timeout(
        std::time::Duration::from_millis(300),
        other.propose_plan(ada, PlanType::PartTime, &plan),
    )
    .await;
    assert!(blocked.is_err(), "proposal should wait for the lock");
    assert_eq!(
        students::get_student(&pool, ada).await.unwrap().unwrap().plan_type,
        None
    );

    held.release().await.unwrap();
    other
        .propose_plan(ada, PlanType::PartTime, &plan)
        .await
        .unwrap();

    other_pool.close().await;
    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn separate_processes_never_strip_a_committed_type() {
    let (pool, db_name) = create_test_db().await;
    seed_catalog(&pool).await;
    let ada = seed_student(&pool, "ada@example.org").await;
    let other_pool = PgPool::connect(&format!("{}/{db_name}", pg_url().await))
        .await
        .unwrap();
    let first = service(&pool);
    let second = service(&other_pool);

    let too_small = ids(&["MA10001"]);
    let legal = ids(&["MA10001", "MA10002", "MA10003"]);
    for _ in 0..10 {
        first.erase_plan_entirely(ada).await.unwrap();
        let (ra, rb) = tokio::join!(
            first.propose_plan(ada, PlanType::FullTime, &too_small),
            second.propose_plan(ada, PlanType::PartTime, &legal),
        );
        assert!(ra.is_err());
        rb.unwrap();

        let plan = first.study_plan(ada).await.unwrap();
        assert!(plan.is_consistent(), "{plan:?}");
        assert_eq!(plan.plan_type, Some(PlanType::PartTime));
    }

    other_pool.close().await;
    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn overlapping_proposals_in_opposite_order_do_not_deadlock() {
    let (pool, db_name) = create_test_db().await;
    seed_catalog(&pool).await;
    let ada = seed_student(&pool, "ada@example.org").await;
    let bob = seed_student(&pool, "bob@example.org").await;
    let svc = service(&pool);

    let forward = ids(&["MA10001", "MA10002", "MA10003"]);
    let backward = ids(&["MA10003", "MA10002", "MA10001"]);
    for _ in 0..10 {
        let (ra, rb) = tokio::join!(
            svc.propose_plan(ada, PlanType::PartTime, &forward),
            svc.propose_plan(bob, PlanType::PartTime, &backward),
        );
        ra.unwrap();
        rb.unwrap();
    }

    let ma = svc
        .course(&CourseId::parse("MA10002").unwrap())
        .await
        .unwrap();
    assert_eq!(ma.signed_up, 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}
