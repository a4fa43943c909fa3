//! Sample scenarios run by `dispatch-cache demo`.
//!
//! Each scenario drives the mediator against in-memory handlers and checks
//! how many times the handlers actually ran.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use dispatch_cache::{
    cache::{
        CacheConfig, CacheLayer, CachePolicy, Field, FieldSet, FieldSpec, FromFields,
        InvalidationPolicy, MemoryStore, Query, QueryCachePolicy,
    },
    config::Settings,
    dispatch::{HandlerError, Mediator, Request, handler_fn},
    error::AppError,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: u32,
    pub name: String,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoList {
    pub todos: Vec<Todo>,
    /// Handler invocation that produced this list.
    pub load: usize,
    pub retrieved_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub number: i32,
    pub title: String,
    pub credits: i32,
}

macro_rules! todo_filter {
    ($name:ident, $tag:literal) => {
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            pub search: Option<String>,
            pub cache_bust: Option<bool>,
        }

        impl Request for $name {
            type Response = TodoList;

            fn type_name() -> &'static str {
                $tag
            }

            fn fields(&self) -> Vec<Field> {
                vec![
                    Field::new("search", &self.search),
                    Field::new("cache_bust", &self.cache_bust),
                ]
            }
        }

        impl FromFields for $name {
            const FIELDS: &'static [FieldSpec] = &[
                FieldSpec::of::<Option<String>>("search"),
                FieldSpec::of::<Option<bool>>("cache_bust"),
            ];

            fn from_fields(fields: &FieldSet) -> Self {
                Self {
                    search: fields.get("search").flatten(),
                    cache_bust: fields.get("cache_bust").flatten(),
                }
            }
        }
    };
}

// Cached by declaration.
todo_filter!(Todos, "Todos");

impl Query for Todos {
    fn cache_options() -> Option<CachePolicy> {
        Some(CachePolicy::declared(1, 5))
    }
}

// Cached through a registered policy that also asks for auto-reload.
todo_filter!(PolicyTodos, "PolicyTodos");

impl Query for PolicyTodos {}

struct ReloadingTodos;

impl QueryCachePolicy<PolicyTodos> for ReloadingTodos {
    fn policy(&self) -> CachePolicy {
        CachePolicy::default().with_auto_reload(true)
    }
}

/// Touches nothing; exists to invalidate both todo lists.
#[derive(Debug, Clone, Default)]
pub struct CacheBust {
    pub search: Option<String>,
    pub cache_bust: Option<bool>,
}

impl Request for CacheBust {
    type Response = ();

    fn type_name() -> &'static str {
        "CacheBust"
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("search", &self.search),
            Field::new("cache_bust", &self.cache_bust),
        ]
    }
}

struct BustPolicyTodos;

impl InvalidationPolicy<CacheBust> for BustPolicyTodos {
    type Target = PolicyTodos;
}

#[derive(Debug, Clone, Default)]
pub struct CourseList;

impl Request for CourseList {
    type Response = Vec<Course>;

    fn type_name() -> &'static str {
        "CourseList"
    }
}

impl Query for CourseList {
    fn cache_options() -> Option<CachePolicy> {
        Some(CachePolicy::declared(1, 5))
    }
}

impl FromFields for CourseList {
    const FIELDS: &'static [FieldSpec] = &[];

    fn from_fields(_fields: &FieldSet) -> Self {
        CourseList
    }
}

#[derive(Debug, Clone)]
pub struct CreateCourse {
    pub number: i32,
    pub title: String,
    pub credits: i32,
}

impl Request for CreateCourse {
    type Response = i32;

    fn type_name() -> &'static str {
        "CreateCourse"
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("number", &self.number),
            Field::new("title", &self.title),
            Field::new("credits", &self.credits),
        ]
    }
}

#[derive(Default)]
struct TodoRepo {
    loads: AtomicUsize,
}

impl TodoRepo {
    fn list(&self, search: Option<&str>) -> TodoList {
        let load = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        let todos = [
            (1, "Buy milk", false),
            (2, "Walk the dog", true),
            (3, "Write the report", false),
        ]
        .into_iter()
        .filter(|(_, name, _)| search.is_none_or(|needle| name.contains(needle)))
        .map(|(id, name, is_complete)| Todo {
            id,
            name: name.to_string(),
            is_complete,
        })
        .collect();
        TodoList {
            todos,
            load,
            retrieved_at: OffsetDateTime::now_utc(),
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct CourseRepo {
    courses: Mutex<Vec<Course>>,
    loads: AtomicUsize,
}

impl CourseRepo {
    fn seeded() -> Self {
        let courses = vec![
            Course {
                number: 1045,
                title: "Calculus".to_string(),
                credits: 4,
            },
            Course {
                number: 3141,
                title: "Trigonometry".to_string(),
                credits: 4,
            },
        ];
        Self {
            courses: Mutex::new(courses),
            loads: AtomicUsize::new(0),
        }
    }

    fn list(&self) -> Result<Vec<Course>, HandlerError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let courses = self
            .courses
            .lock()
            .map_err(|_| HandlerError::message("course table lock poisoned"))?;
        Ok(courses.clone())
    }

    fn create(&self, command: CreateCourse) -> Result<i32, HandlerError> {
        if command.title.trim().is_empty() {
            return Err(HandlerError::message("course title must not be empty"));
        }
        let mut courses = self
            .courses
            .lock()
            .map_err(|_| HandlerError::message("course table lock poisoned"))?;
        courses.push(Course {
            number: command.number,
            title: command.title,
            credits: command.credits,
        });
        Ok(command.number)
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

struct Demo {
    mediator: Mediator,
    layer: CacheLayer,
    todos: Arc<TodoRepo>,
    policy_todos: Arc<TodoRepo>,
    courses: Arc<CourseRepo>,
    cached: bool,
}

fn build(config: CacheConfig) -> Result<Demo, AppError> {
    let cached = config.is_enabled();
    let store = Arc::new(MemoryStore::from_config(&config));
    let mut builder = CacheLayer::builder(config, store);
    builder
        .cache_policy::<PolicyTodos, _>(ReloadingTodos)?
        .link::<CreateCourse, CourseList>()
        .link::<CacheBust, Todos>()
        .invalidation_policy::<CacheBust, _>(BustPolicyTodos);
    let layer = builder.build();

    let todos = Arc::new(TodoRepo::default());
    let policy_todos = Arc::new(TodoRepo::default());
    let courses = Arc::new(CourseRepo::seeded());

    let mediator = Mediator::builder()
        .handle_with(
            handler_fn({
                let repo = todos.clone();
                move |query: Todos| {
                    let repo = repo.clone();
                    async move { Ok::<_, HandlerError>(repo.list(query.search.as_deref())) }
                }
            }),
            layer.query_pipeline::<Todos>(),
        )
        .handle_with(
            handler_fn({
                let repo = policy_todos.clone();
                move |query: PolicyTodos| {
                    let repo = repo.clone();
                    async move { Ok::<_, HandlerError>(repo.list(query.search.as_deref())) }
                }
            }),
            layer.query_pipeline::<PolicyTodos>(),
        )
        .handle_with(
            handler_fn(|_: CacheBust| async { Ok::<_, HandlerError>(()) }),
            layer.command_pipeline::<CacheBust>(),
        )
        .handle_with(
            handler_fn({
                let repo = courses.clone();
                move |_: CourseList| {
                    let repo = repo.clone();
                    async move { repo.list() }
                }
            }),
            layer.query_pipeline::<CourseList>(),
        )
        .handle_with(
            handler_fn({
                let repo = courses.clone();
                move |command: CreateCourse| {
                    let repo = repo.clone();
                    async move { repo.create(command) }
                }
            }),
            layer.command_pipeline::<CreateCourse>(),
        )
        .build();

    Ok(Demo {
        mediator,
        layer,
        todos,
        policy_todos,
        courses,
        cached,
    })
}

fn check(scenario: &'static str, condition: bool, message: &str) -> Result<(), AppError> {
    if condition {
        Ok(())
    } else {
        Err(AppError::unexpected(format!("{scenario}: {message}")))
    }
}

impl Demo {
    /// Repeated identical queries run the handler once.
    async fn todos(&self) -> Result<(), AppError> {
        let query = Todos {
            search: Some("milk".to_string()),
            cache_bust: Some(false),
        };
        let first = self.mediator.send(query.clone()).await?;
        let second = self.mediator.send(query).await?;
        let other = self.mediator.send(Todos::default()).await?;

        let expected = if self.cached { 2 } else { 3 };
        check("todos", self.todos.loads() == expected, "unexpected handler runs")?;
        check(
            "todos",
            !self.cached || first.load == second.load,
            "repeated query was not served from the cache",
        )?;
        info!(
            scenario = "todos",
            loads = self.todos.loads(),
            matching = first.todos.len(),
            all = other.todos.len(),
            "Todos served"
        );
        Ok(())
    }

    /// A new course invalidates the cached course list.
    async fn courses(&self) -> Result<(), AppError> {
        let before = self.mediator.send(CourseList).await?;
        self.mediator.send(CourseList).await?;
        let number = self
            .mediator
            .send(CreateCourse {
                number: 2021,
                title: "Composition".to_string(),
                credits: 3,
            })
            .await?;
        let after = self.mediator.send(CourseList).await?;

        let expected = if self.cached { 2 } else { 3 };
        check("courses", self.courses.loads() == expected, "unexpected handler runs")?;
        check(
            "courses",
            after.len() == before.len() + 1 && after.iter().any(|c| c.number == number),
            "course list is stale after CreateCourse",
        )?;
        info!(
            scenario = "courses",
            loads = self.courses.loads(),
            before = before.len(),
            after = after.len(),
            "Course list refreshed after CreateCourse"
        );
        Ok(())
    }

    /// One command drives both a link and an invalidation policy; only the
    /// policy target reloads.
    async fn cache_bust(&self) -> Result<(), AppError> {
        let todos_before = self.todos.loads();
        self.mediator.send(Todos::default()).await?;
        let stale = self.mediator.send(PolicyTodos::default()).await?;
        let loads_before = self.policy_todos.loads();

        self.mediator.send(CacheBust::default()).await?;
        let reloaded = self.policy_todos.loads() - loads_before;
        let fresh = self.mediator.send(PolicyTodos::default()).await?;
        self.mediator.send(Todos::default()).await?;

        if self.cached {
            check("cache_bust", reloaded == 1, "policy target was not reloaded once")?;
            check(
                "cache_bust",
                fresh.load > stale.load && self.policy_todos.loads() == loads_before + 1,
                "reloaded entry was not served after the bust",
            )?;
            // Todos{} was cached by the todos scenario, then busted and re-read.
            check(
                "cache_bust",
                self.todos.loads() == todos_before + 1,
                "linked target was not invalidated",
            )?;
        }
        info!(
            scenario = "cache_bust",
            reloaded,
            todos_loads = self.todos.loads(),
            policy_todos_loads = self.policy_todos.loads(),
            "CacheBust invalidated both todo lists"
        );
        Ok(())
    }
}

pub async fn run(settings: &Settings) -> Result<(), AppError> {
    let demo = build(CacheConfig::from(&settings.cache))?;

    demo.todos().await?;
    demo.courses().await?;
    demo.cache_bust().await?;

    let failures = demo.layer.events().drain(usize::MAX);
    for event in &failures {
        warn!(
            command = event.command,
            target = event.target,
            key = %event.key,
            stage = %event.stage,
            error = %event.error,
            "Invalidation failure recorded"
        );
    }
    info!(
        cached = demo.cached,
        failures = failures.len(),
        "Demo scenarios completed"
    );
    Ok(())
}
