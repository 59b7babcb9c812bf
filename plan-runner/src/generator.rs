use std::collections::{BTreeMap, HashMap};
use serde_json::Value;

use crate::dag::{pending_sentinel, Phase, Plan, Task, TaskTemplate};
use crate::error::PlanError;
use crate::state::StateStore;
use crate::template::{is_truthy, TemplateContext, TemplateEngine};

/// Expands task templates into concrete tasks
pub struct TaskGenerator {
    engine: TemplateEngine,
    base: TemplateContext,
}

impl TaskGenerator {
    pub fn new(engine: TemplateEngine, base: TemplateContext) -> Self {
        Self { engine, base }
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    pub fn context(&self) -> &TemplateContext {
        &self.base
    }

    /// Every task of the plan: phases, templates and items in declaration order
    pub fn generate_all(&self, plan: &Plan, store: &StateStore) -> Result<Vec<Task>, PlanError> {
        let mut seen = HashMap::new();
        let mut tasks = vec![];
        for phase in &plan.phases {
            self.generate_into(phase, store, &mut seen, &mut tasks)?;
        }
        tracing::info!("Generated {} tasks across {} phases", tasks.len(), plan.phases.len());
        Ok(tasks)
    }

    /// Tasks of one phase, with requirements resolved against the current state
    pub fn generate_phase(&self, phase: &Phase, store: &StateStore) -> Result<Vec<Task>, PlanError> {
        let mut tasks = vec![];
        self.generate_into(phase, store, &mut HashMap::new(), &mut tasks)?;
        Ok(tasks)
    }

    fn generate_into(
        &self,
        phase: &Phase,
        store: &StateStore,
        seen: &mut HashMap<String, String>,
        tasks: &mut Vec<Task>,
    ) -> Result<(), PlanError> {
        for template in &phase.templates {
            for item in self.items(template) {
                let task = self.render_task(phase, template, item, store);

                if let Some(first_template) = seen.get(&task.id) {
                    return Err(PlanError::DuplicateTaskId {
                        task_id: task.id,
                        template: template.name.clone(),
                        first_template: first_template.clone(),
                        item: task
                            .item
                            .as_ref()
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "none".to_string()),
                    });
                }
                seen.insert(task.id.clone(), template.name.clone());
                tasks.push(task);
            }
        }
        Ok(())
    }

    /// Items a template iterates over; `[None]` without `foreach`
    fn items(&self, template: &TaskTemplate) -> Vec<Option<Value>> {
        let Some(reference) = template.foreach.as_deref() else {
            return vec![None];
        };

        match self.engine.resolve_reference(reference, &self.base) {
            Value::Array(items) => items.into_iter().map(Some).collect(),
            value if is_truthy(&value) => vec![Some(value)],
            _ => {
                tracing::warn!(
                    "foreach '{}' of template '{}' resolved to no items",
                    reference,
                    template.name
                );
                vec![]
            }
        }
    }

    fn render_task(
        &self,
        phase: &Phase,
        template: &TaskTemplate,
        item: Option<Value>,
        store: &StateStore,
    ) -> Task {
        let ctx = match &item {
            Some(item) => self.base.with_item(item.clone()),
            None => self.base.clone(),
        };

        let id = self.engine.render(&template.task_id, &ctx);
        let ctx = ctx.with_task_id(&id);

        let outputs: BTreeMap<String, String> = template
            .outputs
            .iter()
            .map(|o| (o.name.clone(), self.engine.render(&o.path, &ctx)))
            .collect();

        let requirements: BTreeMap<String, String> = template
            .requires
            .iter()
            .map(|req| {
                let dep_id = self.engine.render(&req.task, &ctx);
                let path = store
                    .completed_outputs(&dep_id)
                    .and_then(|outputs| outputs.get(&req.output).cloned())
                    .unwrap_or_else(|| pending_sentinel(&dep_id, &req.output));
                (req.alias.clone(), path)
            })
            .collect();

        let ctx = ctx.with_requires(&requirements);
        let prompt = self.engine.render(&template.prompt, &ctx);

        Task {
            id,
            phase: phase.name.clone(),
            template: template.name.clone(),
            prompt,
            outputs,
            requirements,
            item,
        }
    }
}
