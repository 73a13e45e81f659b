/// Configuration for the convergence simulation.
/// Handles command-line argument parsing and validation.
use crate::error::{Result, TreeKemError};
use clap::Parser;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "treekem-sim")]
#[command(about = "Multi-root TreeKEM group with external nodes", long_about = None)]
pub struct SimulationConfig {
    /// Number of group members (default: 3)
    #[arg(long, default_value = "3")]
    pub members: usize,

    /// Number of external nodes invited into the group (default: 1)
    #[arg(long, default_value = "1")]
    pub chatbots: usize,

    /// Update rounds to run after setup (default: 2)
    #[arg(long, default_value = "2")]
    pub rounds: usize,

    /// Enable verbose logging (DEBUG level)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            members: 3,
            chatbots: 1,
            rounds: 2,
            verbose: false,
        }
    }
}

impl SimulationConfig {
    /// Parse command-line arguments into SimulationConfig
    pub fn from_args() -> Self {
        SimulationConfig::parse()
    }

    pub fn validate(&self) -> Result<()> {
        if self.members == 0 {
            return Err(TreeKemError::Config("at least one member is required".to_string()));
        }
        if self.rounds == 0 {
            return Err(TreeKemError::Config("at least one round is required".to_string()));
        }
        Ok(())
    }
}
