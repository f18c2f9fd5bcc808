use serde_json::json;

use crate::{AccountId, Category, LedgerMut, RewardPolicy, Task, TaskToken};

use super::{
    reward::{Reward, RewardReport},
    LedgerAction,
};

/// Complete a pending task and pay its reward.
#[must_use = "actions do nothing unless you `execute` them"]
pub struct CompleteTask<'a, L> {
    ledger: L,
    account: AccountId,
    token: TaskToken,
    policy: &'a RewardPolicy,
}

impl<'a, L: LedgerMut> CompleteTask<'a, L> {
    /// Create a new task completion.
    pub fn new(ledger: L, account: AccountId, token: TaskToken, policy: &'a RewardPolicy) -> Self {
        Self {
            ledger,
            account,
            token,
            policy,
        }
    }
}

impl<L: LedgerMut> LedgerAction for CompleteTask<'_, L> {
    type Report = TaskReport;

    fn execute(mut self) -> crate::Result<Self::Report> {
        let mut task = self
            .ledger
            .task(self.account, &self.token)?
            .ok_or(crate::Error::TaskNotFound)?;
        task.complete(self.ledger.now())?;
        self.ledger.update_task(&task)?;

        let reward = Reward::try_new(
            &mut self.ledger,
            self.account,
            task.amount,
            Category::TaskCredit,
            self.policy.referral(),
        )?
        .count_task(true)
        .metadata(json!({ "task": task.token }))
        .execute()?;

        Ok(TaskReport { task, reward })
    }
}

/// Report of a task completion.
#[derive(Debug, Clone)]
pub struct TaskReport {
    task: Task,
    reward: RewardReport,
}

impl TaskReport {
    /// The completed task.
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// The credit report.
    pub fn reward(&self) -> &RewardReport {
        &self.reward
    }
}
