//! Declarative macros for pipeline DSL
//!
//! This module contains macros for defining pipelines in code with a
//! syntax close to a declarative Jenkinsfile.

/// Creates a shell command step
#[macro_export]
macro_rules! sh {
    ($cmd:expr) => {
        $crate::pipeline::Step::shell($cmd)
    };
}

/// Creates an echo step
#[macro_export]
macro_rules! echo {
    ($msg:expr) => {
        $crate::pipeline::Step::echo($msg)
    };
}

/// Creates a stage, optionally guarded by a `when` condition
#[macro_export]
macro_rules! stage {
    ($name:expr, when: $when:expr, $steps:expr) => {
        $crate::pipeline::Stage::new($name, $steps).with_when($when)
    };
    ($name:expr, $steps:expr) => {
        $crate::pipeline::Stage::new($name, $steps)
    };
}

/// Creates a list of steps
#[macro_export]
macro_rules! steps {
    ($($step:expr),* $(,)?) => {
        vec![$($step),*]
    };
}

/// Creates post hooks keyed by outcome
///
/// ```rust
/// use plinth::{echo, post, sh};
///
/// let hooks = post! {
///     failure(sh!("./notify.sh")),
///     always(echo!("cleanup"), sh!("rm -rf tmp")),
/// };
/// assert_eq!(hooks.always.len(), 2);
/// ```
#[macro_export]
macro_rules! post {
    (@cond always) => { $crate::pipeline::PostCondition::Always };
    (@cond success) => { $crate::pipeline::PostCondition::Success };
    (@cond failure) => { $crate::pipeline::PostCondition::Failure };
    (@cond aborted) => { $crate::pipeline::PostCondition::Aborted };
    (@each $hooks:expr, $cond:ident, $($step:expr),*) => {{
        let mut hooks = $hooks;
        $(
            hooks = hooks.on($crate::post!(@cond $cond), $step);
        )*
        hooks
    }};
    ( $( $cond:ident ( $($step:expr),* $(,)? ) ),* $(,)? ) => {{
        #[allow(unused_mut)]
        let mut hooks = $crate::pipeline::PostHooks::new();
        $(
            hooks = $crate::post!(@each hooks, $cond, $($step),*);
        )*
        hooks
    }};
}

/// Creates a when condition
#[macro_export]
macro_rules! when {
    (always) => {
        $crate::pipeline::WhenCondition::Always
    };
    (param($name:expr)) => {
        $crate::pipeline::WhenCondition::param($name)
    };
    (file_exists($path:expr)) => {
        $crate::pipeline::WhenCondition::file_exists($path)
    };
    (environment($name:expr, $value:expr)) => {
        $crate::pipeline::WhenCondition::environment($name, $value)
    };
    (expression($expr:expr)) => {
        $crate::pipeline::WhenCondition::expression($expr)
    };
    (all_of[$($cond:expr),* $(,)?]) => {
        $crate::pipeline::WhenCondition::all_of(vec![$($cond),*])
    };
    (any_of[$($cond:expr),* $(,)?]) => {
        $crate::pipeline::WhenCondition::any_of(vec![$($cond),*])
    };
    (not($cond:expr)) => {
        $crate::pipeline::WhenCondition::not($cond)
    };
}

/// Creates a pipeline using declarative block syntax
///
/// The result is not validated; call [`Validate::validate`] or hand it to
/// an executor, which validates before running.
///
/// [`Validate::validate`]: crate::pipeline::Validate::validate
#[macro_export]
macro_rules! pipeline {
    (
        name: $name:expr,
        $( environment { $( $env_key:ident = $env_value:expr ),* $(,)? } )?
        $( parameters { $( $param:expr ),* $(,)? } )?
        stages { $( $stage:expr ),* $(,)? }
        $( post { $( $post:tt )* } )?
    ) => {{
        #[allow(unused_mut)]
        let mut builder = $crate::pipeline::Pipeline::builder().name($name);
        $(
            $(
                builder = builder.environment(|env| env.set(stringify!($env_key), $env_value));
            )*
        )?
        $(
            $(
                builder = builder.parameter($param);
            )*
        )?
        $(
            builder = builder.stage($stage);
        )*
        $(
            builder = builder.posts($crate::post!($($post)*));
        )?
        builder.build_unchecked()
    }};
}

#[cfg(test)]
mod tests {
    use crate::pipeline::{
        ParameterDefinition, PostCondition, PostHooks, StepType, Validate, WhenCondition,
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sh_macro() {
        let step = sh!("echo test");
        assert_eq!(step.step_type, StepType::shell("echo test"));
    }

    #[test]
    fn test_echo_macro() {
        let step = echo!("Hello");
        assert_eq!(step.step_type, StepType::echo("Hello"));
    }

    #[test]
    fn test_stage_macro() {
        let stage = stage!("Build", steps!(sh!("cargo build")));
        assert_eq!(stage.name, "Build");
        assert_eq!(stage.steps.len(), 1);
        assert!(stage.when.is_none());

        let guarded = stage!(
            "Docker",
            when: when!(file_exists("Dockerfile")),
            steps!(sh!("docker build ."))
        );
        assert_eq!(guarded.when, Some(WhenCondition::file_exists("Dockerfile")));
    }

    #[test]
    fn test_steps_macro_trailing_comma() {
        let steps = steps!(sh!("a"), sh!("b"),);
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_post_macro() {
        let hooks = post! {
            failure(sh!("./notify.sh")),
            always(echo!("cleanup"), sh!("rm -rf tmp")),
        };
        assert_eq!(hooks.steps(PostCondition::Failure).len(), 1);
        assert_eq!(hooks.steps(PostCondition::Always).len(), 2);
        assert!(hooks.success.is_empty());

        let empty: PostHooks = post! {};
        assert!(empty.is_empty());
    }

    #[test]
    fn test_when_macro_nests() {
        let cond = when!(all_of[
            when!(param("DEPLOY")),
            when!(not(when!(environment("BRANCH", "dev")))),
        ]);
        assert_eq!(
            cond,
            WhenCondition::all_of(vec![
                WhenCondition::param("DEPLOY"),
                WhenCondition::not(WhenCondition::environment("BRANCH", "dev")),
            ])
        );
        assert_eq!(when!(always), WhenCondition::Always);
        assert!(when!(expression("env.CI == 'true'")).validate().is_ok());
    }

    #[test]
    fn test_pipeline_macro_simple() {
        let pipeline = pipeline! {
            name: "ci",
            stages {
                stage!("Build", steps!(sh!("cargo build"))),
                stage!("Test", steps!(sh!("cargo test"))),
            }
        };
        assert_eq!(pipeline.name, "ci");
        assert_eq!(pipeline.stage_count(), 2);
        assert!(pipeline.post.is_empty());
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_pipeline_macro_full() {
        let pipeline = pipeline! {
            name: "webapp",
            environment {
                NODE_ENV = "production",
                CI = "true",
            }
            parameters {
                ParameterDefinition::boolean("DEPLOY", false),
            }
            stages {
                stage!("Build", steps!(sh!("npm ci"), sh!("npm run build"))),
                stage!("Deploy", when: when!(param("DEPLOY")), steps!(sh!("./deploy.sh"))),
            }
            post {
                failure(echo!("build failed")),
                always(sh!("rm -rf node_modules/.cache")),
            }
        };

        assert_eq!(pipeline.environment.get("NODE_ENV"), Some("production"));
        assert_eq!(pipeline.environment.len(), 2);
        assert_eq!(pipeline.parameters.len(), 1);
        assert_eq!(
            pipeline.stage("Deploy").and_then(|s| s.when.clone()),
            Some(WhenCondition::param("DEPLOY"))
        );
        assert_eq!(pipeline.post.steps(PostCondition::Always).len(), 1);
        assert!(pipeline.validate().is_ok());
    }
}
