//! Collaborators around the Recast core: WAV probing and reading, WAV
//! output, and the job pipeline driving a mix session

pub mod audio;
