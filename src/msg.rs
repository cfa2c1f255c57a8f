use crate::installer::RunReport;

/// Messages sent from the install worker to the main loop.
#[derive(Debug)]
pub enum Msg {
    Progress { percent: u8, label: String },
    Finished(RunReport),
}
