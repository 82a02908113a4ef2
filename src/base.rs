//! The experiment-framework side of a task: page phase, condition, survey
//! answers and the result form. Task-specific controllers hold a `BaseTask`
//! and call through to it from their own hooks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::config::{TaskConfig, UrlParams};

/// Which page of the experiment is showing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Phase {
    /// Images are still being fetched.
    #[default]
    Loading,
    /// Instructions and demo; waiting for the participant to continue.
    Instructions,
    Main,
    Survey,
    Finished,
}

/// Behaviour switches normally supplied through the page URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BaseFlags {
    pub skip_quiz: bool,
    pub skip_survey: bool,
    /// Show the result form on screen instead of only submitting it.
    pub debug: bool,
}

/// Outcome of [`BaseTask::load_survey`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurveyStep {
    Shown,
    /// The survey is disabled; the caller should print the form now.
    Skipped,
}

/// Text the page shows outside of the task area.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageMessages {
    /// Blocking modal; the participant dismisses it to continue.
    pub alert: Option<String>,
    /// Error text replacing the instructions (fatal to the session).
    pub error: Option<String>,
    /// Result form printed on screen in debug mode.
    pub form_text: Option<String>,
}

pub type SurveyAnswers = BTreeMap<String, String>;

/// Lifecycle hooks a task controller delegates to.
pub trait BaseTask {
    fn phase(&self) -> Phase;
    fn set_phase(&mut self, phase: Phase);
    fn flags(&self) -> BaseFlags;
    fn flags_mut(&mut self) -> &mut BaseFlags;
    fn condition(&self) -> &str;
    fn messages(&self) -> &PageMessages;
    fn messages_mut(&mut self) -> &mut PageMessages;
    fn survey(&self) -> &SurveyAnswers;
    fn survey_mut(&mut self) -> &mut SurveyAnswers;

    /// Leave the instructions and begin the trials.
    fn start_main_exp(&mut self);
    /// Required-field check for the framework's own survey questions.
    fn check_survey(&mut self) -> bool;
    fn load_survey(&mut self) -> SurveyStep;
    /// Append task output to the result payload.
    fn append_data(&mut self, text: &str);
    /// Assemble and store the final result form.
    fn print_data_to_form(&mut self);
    /// Surface a non-fatal configuration problem to the participant.
    fn throw_error(&mut self, msg: &str);

    fn alert(&mut self, msg: &str) {
        self.messages_mut().alert = Some(msg.to_string());
    }

    fn dismiss_alert(&mut self) {
        self.messages_mut().alert = None;
    }
}

/// Minimal framework implementation used by the drawing tasks.
#[derive(Clone, Debug)]
pub struct SuperTask {
    pub session_id: Uuid,
    pub worker_id: Option<String>,
    condition: String,
    phase: Phase,
    flags: BaseFlags,
    messages: PageMessages,
    survey: SurveyAnswers,
    txt: String,
    form: Option<String>,
}

impl SuperTask {
    pub fn new<R: Rng + ?Sized>(config: &TaskConfig, rng: &mut R) -> Self {
        let url = &config.url;
        Self {
            session_id: Uuid::new_v4(),
            worker_id: url.param("workerId").map(str::to_string),
            condition: choose_condition(&config.list_condition, url, rng),
            phase: Phase::Loading,
            flags: BaseFlags {
                skip_quiz: url.flag("skip_quiz").unwrap_or(false),
                skip_survey: url.flag("skip_survey").unwrap_or(false),
                debug: url.flag("debug").unwrap_or(false),
            },
            messages: PageMessages::default(),
            survey: SurveyAnswers::new(),
            txt: String::new(),
            form: None,
        }
    }

    /// Accumulated task output.
    pub fn data(&self) -> &str {
        &self.txt
    }

    /// The printed result form, once the task has finished.
    pub fn form(&self) -> Option<&str> {
        self.form.as_deref()
    }

    /// Write the printed form to `<dir>/<worker>-<unix secs>.txt`.
    pub fn write_results(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let form = self.form.as_deref().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "result form has not been printed")
        })?;
        std::fs::create_dir_all(dir)?;
        let who = self.worker_id.as_deref().unwrap_or("anon");
        let safe: String = who
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = dir.join(format!("{}-{}.txt", safe, crate::logger::unix_secs()));
        std::fs::write(&path, form)?;
        crate::log_info!("Results written to {}", path.display());
        Ok(path)
    }
}

/// A `condition` URL parameter wins when it names a listed condition;
/// otherwise one is drawn at random.
fn choose_condition<R: Rng + ?Sized>(list: &[String], url: &UrlParams, rng: &mut R) -> String {
    if let Some(c) = url.param("condition")
        && list.iter().any(|l| l == c)
    {
        return c.to_string();
    }
    list.choose(rng).cloned().unwrap_or_else(|| "default".to_string())
}

impl BaseTask for SuperTask {
    fn phase(&self) -> Phase {
        self.phase
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn flags(&self) -> BaseFlags {
        self.flags
    }

    fn flags_mut(&mut self) -> &mut BaseFlags {
        &mut self.flags
    }

    fn condition(&self) -> &str {
        &self.condition
    }

    fn messages(&self) -> &PageMessages {
        &self.messages
    }

    fn messages_mut(&mut self) -> &mut PageMessages {
        &mut self.messages
    }

    fn survey(&self) -> &SurveyAnswers {
        &self.survey
    }

    fn survey_mut(&mut self) -> &mut SurveyAnswers {
        &mut self.survey
    }

    fn start_main_exp(&mut self) {
        self.phase = Phase::Main;
    }

    fn check_survey(&mut self) -> bool {
        true
    }

    fn load_survey(&mut self) -> SurveyStep {
        if self.flags.skip_survey {
            SurveyStep::Skipped
        } else {
            self.phase = Phase::Survey;
            SurveyStep::Shown
        }
    }

    fn append_data(&mut self, text: &str) {
        self.txt.push_str(text);
    }

    fn print_data_to_form(&mut self) {
        let mut form = String::new();
        form.push_str(&format!("session={}\n", self.session_id));
        form.push_str(&format!("condition={}\n", self.condition));
        form.push_str(&format!(
            "workerId={}\n",
            self.worker_id.as_deref().unwrap_or("")
        ));
        for (k, v) in &self.survey {
            form.push_str(&format!("{}={}\n", k, v.replace('\n', " ")));
        }
        form.push('\n');
        form.push_str(&self.txt);

        if self.flags.debug {
            self.messages.form_text = Some(form.clone());
        }
        self.form = Some(form);
        self.phase = Phase::Finished;
        crate::log_info!("Result form printed ({} bytes)", self.txt.len());
    }

    fn throw_error(&mut self, msg: &str) {
        crate::log_err!("{}", msg);
        self.messages.error = Some(msg.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn task(query: &str) -> SuperTask {
        let config = TaskConfig {
            list_condition: vec!["a".into(), "b".into()],
            url: UrlParams::from_query(query),
            ..TaskConfig::default()
        };
        SuperTask::new(&config, &mut StdRng::seed_from_u64(3))
    }

    #[test]
    fn url_flags_and_condition() {
        let t = task("condition=b&debug=true&workerId=W9");
        assert_eq!(t.condition(), "b");
        assert!(t.flags().debug);
        assert!(!t.flags().skip_survey);
        assert_eq!(t.worker_id.as_deref(), Some("W9"));

        let t = task("condition=zzz");
        assert!(["a", "b"].contains(&t.condition()));
    }

    #[test]
    fn load_survey_honours_skip() {
        let mut t = task("");
        assert_eq!(t.load_survey(), SurveyStep::Shown);
        assert_eq!(t.phase(), Phase::Survey);

        let mut t = task("skip_survey=true");
        assert_eq!(t.load_survey(), SurveyStep::Skipped);
        assert_eq!(t.phase(), Phase::Loading);
    }

    #[test]
    fn print_data_to_form_collects_everything() {
        let mut t = task("debug=1&workerId=W1");
        t.survey_mut().insert("survey_txt_country".into(), "NZ".into());
        t.append_data("line one\n");
        t.print_data_to_form();
        let form = t.form().unwrap();
        assert!(form.contains("workerId=W1\n"));
        assert!(form.contains("survey_txt_country=NZ\n"));
        assert!(form.ends_with("line one\n"));
        assert_eq!(t.messages().form_text.as_deref(), Some(form));
        assert_eq!(t.phase(), Phase::Finished);
    }

    #[test]
    fn write_results_requires_a_form() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = task("workerId=a/b");
        assert!(t.write_results(dir.path()).is_err());
        t.print_data_to_form();
        let path = t.write_results(dir.path()).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("a_b-"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), t.form().unwrap());
    }

    #[test]
    fn throw_error_and_alerts() {
        let mut t = task("");
        t.throw_error("bad ntrials");
        assert_eq!(t.messages().error.as_deref(), Some("bad ntrials"));
        t.alert("hey");
        assert_eq!(t.messages().alert.as_deref(), Some("hey"));
        t.dismiss_alert();
        assert!(t.messages().alert.is_none());
    }
}
