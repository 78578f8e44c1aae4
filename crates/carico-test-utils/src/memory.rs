//! In-memory [`PlanStore`] with fault injection.
//!
//! Writers stage changes per student and publish them on `commit`; a writer
//! dropped without committing leaves the store untouched. Capacity is
//! re-checked on every insert against committed plans, like the Postgres
//! store does under its row lock. Mutation locks are shared by every clone,
//! the way the Postgres advisory lock is shared by every connection.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use carico_core::catalog::{CatalogView, Course, CourseId};
use carico_core::service::{StudentGuard, StudentLocks};
use carico_core::store::{MutationLock, PlanStore, PlanWriter, StoreError};
use carico_core::{PlanType, StudentId};

#[derive(Debug, Clone)]
struct CourseEntry {
    course: Course,
    /// Seats held by students the store does not track.
    baseline: u32,
}

#[derive(Debug, Clone, Default)]
struct StudentEntry {
    plan_type: Option<PlanType>,
    plan: BTreeSet<CourseId>,
}

#[derive(Debug, Default)]
struct State {
    courses: BTreeMap<CourseId, CourseEntry>,
    students: HashMap<StudentId, StudentEntry>,
}

impl State {
    fn enrolled(&self, course: &CourseId, excluding: Option<StudentId>) -> u32 {
        let baseline = self.courses.get(course).map_or(0, |c| c.baseline);
        let tracked = self
            .students
            .iter()
            .filter(|(id, entry)| Some(**id) != excluding && entry.plan.contains(course))
            .count();
        baseline + tracked as u32
    }

    fn course_view(&self, entry: &CourseEntry) -> Course {
        let mut course = entry.course.clone();
        course.signed_up = self.enrolled(&course.id, None);
        course
    }
}

/// Failures to inject into the next matching store call.
#[derive(Debug, Default)]
struct Faults {
    fail_begin: bool,
    fail_insert: Option<CourseId>,
    fail_set_type: Vec<Option<PlanType>>,
    fail_commit: bool,
    /// Seats taken by an outside writer right before the first insert.
    steal_seat: Option<CourseId>,
    /// Yield to the scheduler at the start of every store call.
    interleave: bool,
}

fn injected(what: &str) -> StoreError {
    StoreError::Backend(anyhow::anyhow!("injected failure: {what}"))
}

/// Shared in-memory store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<Faults>>,
    writes: Arc<Mutex<Vec<(StudentId, Option<PlanType>)>>>,
    mutation_locks: StudentLocks,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a catalog course. Its `signed_up` becomes the number of seats
    /// held by untracked students.
    pub fn with_course(self, course: Course) -> Self {
        let baseline = course.signed_up;
        lock(&self.state)
            .courses
            .insert(course.id.clone(), CourseEntry { course, baseline });
        self
    }

    /// Add a student with a stored plan.
    pub fn with_student(self, id: StudentId, plan_type: Option<PlanType>, plan: &[&str]) -> Self {
        let plan = plan.iter().map(|c| course_id(c)).collect();
        lock(&self.state)
            .students
            .insert(id, StudentEntry { plan_type, plan });
        self
    }

    pub fn fail_begin(&self) {
        lock(&self.faults).fail_begin = true;
    }

    /// Fail the next insert of `course` inside a writer.
    pub fn fail_insert_of(&self, course: &str) {
        lock(&self.faults).fail_insert = Some(course_id(course));
    }

    /// Fail the next `set_plan_type` that writes `value`, in or out of a
    /// writer.
    pub fn fail_set_plan_type_to(&self, value: Option<PlanType>) {
        lock(&self.faults).fail_set_type.push(value);
    }

    pub fn fail_commit(&self) {
        lock(&self.faults).fail_commit = true;
    }

    /// Let an untracked student grab a seat of `course` right before the
    /// next insert of any course.
    pub fn steal_seat_before_insert(&self, course: &str) {
        lock(&self.faults).steal_seat = Some(course_id(course));
    }

    /// Make every store call yield once, so concurrent callers interleave
    /// between calls.
    pub fn interleave_calls(&self) {
        lock(&self.faults).interleave = true;
    }

    /// Committed plan type of a student.
    pub fn plan_type_of(&self, student: StudentId) -> Option<PlanType> {
        lock(&self.state)
            .students
            .get(&student)
            .and_then(|s| s.plan_type)
    }

    /// Committed plan of a student.
    pub fn plan_of(&self, student: StudentId) -> BTreeSet<CourseId> {
        lock(&self.state)
            .students
            .get(&student)
            .map(|s| s.plan.clone())
            .unwrap_or_default()
    }

    /// Committed enrollment count of a course.
    pub fn signed_up(&self, course: &str) -> u32 {
        let state = lock(&self.state);
        state.enrolled(&course_id(course), None)
    }

    /// Every successful non-transactional plan type write, in order.
    pub fn plan_type_writes(&self) -> Vec<(StudentId, Option<PlanType>)> {
        lock(&self.writes).clone()
    }

    async fn pause(&self) {
        let interleave = lock(&self.faults).interleave;
        if interleave {
            tokio::task::yield_now().await;
        }
    }

    fn take_set_type_fault(&self, value: Option<PlanType>) -> bool {
        let mut faults = lock(&self.faults);
        match faults.fail_set_type.iter().position(|v| *v == value) {
            Some(pos) => {
                faults.fail_set_type.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Parse a course id literal.
///
/// # Panics
///
/// Panics on an invalid id.
pub fn course_id(id: &str) -> CourseId {
    CourseId::parse(id).unwrap_or_else(|e| panic!("bad course id {id:?}: {e}"))
}

/// An uncapped course without prerequisite or incompatibilities.
pub fn course(id: &str, cfu: u32) -> Course {
    Course {
        id: course_id(id),
        name: format!("Course {id}"),
        cfu,
        capacity: None,
        signed_up: 0,
        prerequisite: None,
        incompatibilities: BTreeSet::new(),
    }
}

#[async_trait]
impl CatalogView for MemoryStore {
    async fn get_course(&self, id: &CourseId) -> Result<Option<Course>, StoreError> {
        self.pause().await;
        let state = lock(&self.state);
        Ok(state.courses.get(id).map(|entry| state.course_view(entry)))
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        self.pause().await;
        let state = lock(&self.state);
        let mut courses: Vec<Course> = state
            .courses
            .values()
            .map(|entry| state.course_view(entry))
            .collect();
        courses.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(courses)
    }

    async fn get_plan(&self, student: StudentId) -> Result<BTreeSet<CourseId>, StoreError> {
        self.pause().await;
        Ok(self.plan_of(student))
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn lock_student_mutation(
        &self,
        student: StudentId,
    ) -> Result<Box<dyn MutationLock>, StoreError> {
        self.pause().await;
        Ok(Box::new(MemoryMutationLock {
            _guard: self.mutation_locks.acquire(student).await,
        }))
    }

    async fn get_plan_type(&self, student: StudentId) -> Result<Option<PlanType>, StoreError> {
        self.pause().await;
        lock(&self.state)
            .students
            .get(&student)
            .map(|s| s.plan_type)
            .ok_or(StoreError::StudentNotFound(student))
    }

    async fn set_plan_type(
        &self,
        student: StudentId,
        plan_type: Option<PlanType>,
    ) -> Result<Option<PlanType>, StoreError> {
        self.pause().await;
        if self.take_set_type_fault(plan_type) {
            return Err(injected("set plan type"));
        }
        let mut state = lock(&self.state);
        let entry = state
            .students
            .get_mut(&student)
            .ok_or(StoreError::StudentNotFound(student))?;
        entry.plan_type = plan_type;
        lock(&self.writes).push((student, plan_type));
        Ok(plan_type)
    }

    async fn begin(&self) -> Result<Box<dyn PlanWriter>, StoreError> {
        self.pause().await;
        if std::mem::take(&mut lock(&self.faults).fail_begin) {
            return Err(injected("begin"));
        }
        Ok(Box::new(MemoryWriter {
            store: self.clone(),
            staged: HashMap::new(),
            finished: false,
        }))
    }
}

/// Held for the length of one plan mutation.
struct MemoryMutationLock {
    _guard: StudentGuard,
}

#[async_trait]
impl MutationLock for MemoryMutationLock {
    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A staged write transaction over a [`MemoryStore`].
pub struct MemoryWriter {
    store: MemoryStore,
    staged: HashMap<StudentId, StudentEntry>,
    finished: bool,
}

impl MemoryWriter {
    fn staged(&mut self, student: StudentId) -> Result<&mut StudentEntry, StoreError> {
        if self.finished {
            return Err(StoreError::TransactionFinished);
        }
        if !self.staged.contains_key(&student) {
            let committed = lock(&self.store.state)
                .students
                .get(&student)
                .cloned()
                .ok_or(StoreError::StudentNotFound(student))?;
            self.staged.insert(student, committed);
        }
        self.staged
            .get_mut(&student)
            .ok_or(StoreError::StudentNotFound(student))
    }
}

#[async_trait]
impl PlanWriter for MemoryWriter {
    async fn lock_student(&mut self, student: StudentId) -> Result<Option<PlanType>, StoreError> {
        Ok(self.staged(student)?.plan_type)
    }

    async fn lock_courses(&mut self, _courses: &[CourseId]) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::TransactionFinished);
        }
        self.store.pause().await;
        Ok(())
    }

    async fn erase_plan(&mut self, student: StudentId) -> Result<(), StoreError> {
        self.store.pause().await;
        self.staged(student)?.plan.clear();
        Ok(())
    }

    async fn insert_course(
        &mut self,
        student: StudentId,
        course: &CourseId,
    ) -> Result<(), StoreError> {
        self.store.pause().await;
        self.staged(student)?;

        {
            let mut faults = lock(&self.store.faults);
            if faults.fail_insert.as_ref() == Some(course) {
                faults.fail_insert = None;
                return Err(injected("insert course"));
            }
            if let Some(stolen) = faults.steal_seat.take() {
                if let Some(entry) = lock(&self.store.state).courses.get_mut(&stolen) {
                    entry.baseline += 1;
                }
            }
        }

        let capacity = {
            let state = lock(&self.store.state);
            let entry = state
                .courses
                .get(course)
                .ok_or_else(|| StoreError::UnknownCourse(course.clone()))?;
            entry
                .course
                .capacity
                .map(|cap| (cap, state.enrolled(course, Some(student))))
        };
        if let Some((capacity, enrolled)) = capacity {
            if enrolled + 1 > capacity {
                return Err(StoreError::CourseFull(course.clone()));
            }
        }

        self.staged(student)?.plan.insert(course.clone());
        Ok(())
    }

    async fn set_plan_type(
        &mut self,
        student: StudentId,
        plan_type: Option<PlanType>,
    ) -> Result<(), StoreError> {
        if self.store.take_set_type_fault(plan_type) {
            return Err(injected("set plan type"));
        }
        self.staged(student)?.plan_type = plan_type;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::TransactionFinished);
        }
        self.finished = true;
        if std::mem::take(&mut lock(&self.store.faults).fail_commit) {
            return Err(injected("commit"));
        }
        let mut state = lock(&self.store.state);
        for (student, entry) in self.staged.drain() {
            state.students.insert(student, entry);
        }
        Ok(())
    }
}
