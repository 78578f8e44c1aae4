//! Query-level tests against a temporary PostgreSQL database.

use std::time::Duration;

use carico_db::models::PlanType;
use carico_db::pool;
use carico_db::queries::study_plan::InsertOutcome;
use carico_db::queries::{courses, students, study_plan};
use carico_test_utils::{
    create_test_db, drop_test_db, seed_course, seed_incompatibility, seed_student,
};

#[tokio::test]
async fn courses_are_listed_by_name_with_enrollment() {
    let (pool, db_name) = create_test_db().await;
    seed_course(&pool, "MA10001", 10, None, None).await;
    seed_course(&pool, "CS10001", 7, Some(2), None).await;
    let ada = seed_student(&pool, "ada@example.org").await;
    let bob = seed_student(&pool, "bob@example.org").await;
    study_plan::insert_course(&pool, ada, "CS10001").await.unwrap();
    study_plan::insert_course(&pool, bob, "CS10001").await.unwrap();

    let listed = courses::list_courses(&pool).await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
    // Seeded names are "Course <id>".
    assert_eq!(ids, ["CS10001", "MA10001"]);
    assert_eq!(listed[0].signed_up, 2);
    assert_eq!(listed[0].max_students, Some(2));
    assert_eq!(listed[1].signed_up, 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn incompatibilities_read_from_both_sides() {
    let (pool, db_name) = create_test_db().await;
    seed_course(&pool, "IN10001", 6, None, None).await;
    seed_course(&pool, "IN10002", 6, None, None).await;
    seed_course(&pool, "IN10003", 6, None, None).await;
    seed_incompatibility(&pool, "IN10001", "IN10002").await;
    seed_incompatibility(&pool, "IN10003", "IN10001").await;
    // Idempotent.
    seed_incompatibility(&pool, "IN10001", "IN10002").await;

    let first = courses::get_course(&pool, "IN10001").await.unwrap().unwrap();
    assert_eq!(first.incompatibilities, ["IN10002", "IN10003"]);
    let second = courses::get_course(&pool, "IN10002").await.unwrap().unwrap();
    assert_eq!(second.incompatibilities, ["IN10001"]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn plan_type_is_set_and_cleared() {
    let (pool, db_name) = create_test_db().await;
    let ada = seed_student(&pool, "ada@example.org").await;

    let fresh = students::get_student(&pool, ada).await.unwrap().unwrap();
    assert_eq!(fresh.plan_type, None);

    let rows = students::set_plan_type(&pool, ada, Some(PlanType::PartTime))
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let mut tx = pool.begin().await.unwrap();
    let locked = students::lock_student(&mut tx, ada).await.unwrap();
    assert_eq!(locked, Some(Some(PlanType::PartTime)));
    students::set_plan_type(&mut *tx, ada, None).await.unwrap();
    tx.commit().await.unwrap();

    let cleared = students::get_student(&pool, ada).await.unwrap().unwrap();
    assert_eq!(cleared.plan_type, None);

    assert_eq!(
        students::set_plan_type(&pool, ada + 1, None).await.unwrap(),
        0
    );
    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(students::lock_student(&mut conn, ada + 1).await.unwrap(), None);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn duplicate_email_is_refused() {
    let (pool, db_name) = create_test_db().await;
    seed_student(&pool, "ada@example.org").await;

    let err = students::insert_student(&pool, "ada@example.org", "Ada", "Byron")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ada@example.org"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn erase_removes_only_the_students_rows() {
    let (pool, db_name) = create_test_db().await;
    seed_course(&pool, "MA10001", 10, None, None).await;
    seed_course(&pool, "MA10002", 10, None, None).await;
    let ada = seed_student(&pool, "ada@example.org").await;
    let bob = seed_student(&pool, "bob@example.org").await;
    study_plan::insert_course(&pool, ada, "MA10001").await.unwrap();
    study_plan::insert_course(&pool, ada, "MA10002").await.unwrap();
    study_plan::insert_course(&pool, bob, "MA10001").await.unwrap();

    assert_eq!(study_plan::erase_plan(&pool, ada).await.unwrap(), 2);
    assert!(study_plan::get_plan(&pool, ada).await.unwrap().is_empty());
    assert_eq!(study_plan::get_plan(&pool, bob).await.unwrap(), ["MA10001"]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn checked_insert_respects_capacity_and_excludes_the_student() {
    let (pool, db_name) = create_test_db().await;
    seed_course(&pool, "CS10001", 7, Some(1), None).await;
    let ada = seed_student(&pool, "ada@example.org").await;
    let bob = seed_student(&pool, "bob@example.org").await;

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(
        study_plan::insert_course_checked(&mut conn, ada, "CS10001")
            .await
            .unwrap(),
        InsertOutcome::Inserted
    );
    assert_eq!(
        study_plan::insert_course_checked(&mut conn, bob, "CS10001")
            .await
            .unwrap(),
        InsertOutcome::CourseFull {
            capacity: 1,
            enrolled: 1
        }
    );
    assert_eq!(
        study_plan::insert_course_checked(&mut conn, bob, "ZZ99999")
            .await
            .unwrap(),
        InsertOutcome::UnknownCourse
    );

    // Re-inserting after an erase in the same transaction keeps the seat.
    let mut tx = pool.begin().await.unwrap();
    study_plan::erase_plan(&mut *tx, ada).await.unwrap();
    assert_eq!(
        study_plan::insert_course_checked(&mut tx, ada, "CS10001")
            .await
            .unwrap(),
        InsertOutcome::Inserted
    );
    tx.commit().await.unwrap();

    drop(conn);
    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn schema_rejects_bad_rows() {
    let (pool, db_name) = create_test_db().await;
    let mut conn = pool.acquire().await.unwrap();

    let short_id = courses::insert_course(
        &mut conn,
        &carico_db::models::NewCourse {
            id: "CS1",
            name: "Too short",
            cfu: 6,
            max_students: None,
            preparatory: None,
        },
    )
    .await;
    assert!(short_id.is_err());

    let zero_cfu = courses::insert_course(
        &mut conn,
        &carico_db::models::NewCourse {
            id: "CS10001",
            name: "No credit",
            cfu: 0,
            max_students: None,
            preparatory: None,
        },
    )
    .await;
    assert!(zero_cfu.is_err());

    drop(conn);
    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn overview_counts_full_courses_and_plans() {
    let (pool, db_name) = create_test_db().await;
    seed_course(&pool, "CS10001", 7, Some(1), None).await;
    seed_course(&pool, "CS20002", 6, Some(5), None).await;
    seed_course(&pool, "MA10001", 10, None, None).await;
    seed_incompatibility(&pool, "CS20002", "MA10001").await;
    let ada = seed_student(&pool, "ada@example.org").await;
    seed_student(&pool, "bob@example.org").await;

    let empty = pool::catalog_overview(&pool).await.unwrap();
    assert_eq!(empty.full_courses, 0);
    assert_eq!(empty.students_with_plan, 0);

    students::set_plan_type(&pool, ada, Some(PlanType::PartTime))
        .await
        .unwrap();
    study_plan::insert_course(&pool, ada, "CS10001").await.unwrap();
    study_plan::insert_course(&pool, ada, "CS20002").await.unwrap();

    let overview = pool::catalog_overview(&pool).await.unwrap();
    assert_eq!(
        overview,
        pool::CatalogOverview {
            courses: 3,
            capped_courses: 2,
            full_courses: 1,
            incompatibilities: 1,
            students: 2,
            students_with_plan: 1,
            enrollments: 2,
        }
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn students_are_listed_by_id() {
    let (pool, db_name) = create_test_db().await;
    let bob = seed_student(&pool, "bob@example.org").await;
    let ada = seed_student(&pool, "ada@example.org").await;

    let listed = students::list_students(&pool).await.unwrap();
    let ids: Vec<i64> = listed.iter().map(|s| s.id).collect();
    assert_eq!(ids, [bob, ada]);
    assert!(listed.iter().all(|s| s.plan_type.is_none()));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn course_locks_are_taken_in_id_order() {
    let (pool, db_name) = create_test_db().await;
    seed_course(&pool, "MA10001", 10, None, None).await;
    seed_course(&pool, "CS10001", 7, Some(2), None).await;

    let mut tx = pool.begin().await.unwrap();
    let locked = courses::lock_courses(
        &mut tx,
        &["MA10001".to_string(), "XX99999".to_string(), "CS10001".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(locked, ["CS10001", "MA10001"]);
    tx.rollback().await.unwrap();

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn plan_mutation_lock_is_held_until_transaction_ends() {
    let (pool, db_name) = create_test_db().await;
    let ada = seed_student(&pool, "ada@example.org").await;

    let mut first = pool.begin().await.unwrap();
    students::lock_plan_mutation(&mut first, ada).await.unwrap();

    let mut second = pool.begin().await.unwrap();
    let blocked = tokio::time::timeout(
        Duration::from_millis(200),
        students::lock_plan_mutation(&mut second, ada),
    )
    .await;
    assert!(blocked.is_err(), "second lock should wait for the first");
    // The timed-out wait left the connection mid-query.
    drop(second);

    // Other students are not affected.
    let mut other = pool.begin().await.unwrap();
    students::lock_plan_mutation(&mut other, ada + 1).await.unwrap();
    other.rollback().await.unwrap();

    first.commit().await.unwrap();
    let mut third = pool.begin().await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        students::lock_plan_mutation(&mut third, ada),
    )
    .await
    .expect("lock should be free after commit")
    .unwrap();
    third.rollback().await.unwrap();

    pool.close().await;
    drop_test_db(&db_name).await;
}
