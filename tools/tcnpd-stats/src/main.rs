// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! tcnpd-stats - request and display the global PD statistics of a remote
//! TCN end device.
//!
//! Sends a PD pull request for the statistics telegram and prints the
//! decoded snapshot once the reply arrives.

use clap::Parser;
use std::net::Ipv4Addr;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tcnpd::{
    PdCallback, PdConfig, PdError, PdSession, PktFlags, SessionOptions, StatsSnapshot,
    UdpTransport, GLOBAL_STATISTICS_COMID, STATISTICS_REQUEST_COMID,
};

/// Request the general statistics from a TCN end device
#[derive(Parser, Debug)]
#[command(name = "tcnpd-stats")]
#[command(version, disable_version_flag = true)]
#[command(about = "Request and display the global PD statistics of a remote end device")]
struct Args {
    /// Own IP address in dotted decimal
    #[arg(short = 'o', long = "own")]
    own_ip: Ipv4Addr,

    /// Reply IP address the statistics shall be sent to
    #[arg(short = 'r', long = "reply")]
    reply_ip: Ipv4Addr,

    /// Target IP address of the queried end device
    #[arg(short = 't', long = "target")]
    target_ip: Ipv4Addr,

    /// Print version and quit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

fn main() {
    // RUST_LOG-driven engine diagnostics.
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            // Usage errors count as initialization failures; -h/-v do not.
            process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };
    if let Err(err) = run(&args) {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let done = Arc::new(AtomicBool::new(false));
    let done_flag = done.clone();
    let callback: PdCallback = Arc::new(move |info, data| match info.result_code {
        None => {
            println!("ComID {} received", info.com_id);
            if info.com_id == GLOBAL_STATISTICS_COMID {
                match StatsSnapshot::decode(data) {
                    Ok(snapshot) => {
                        print_stats(&snapshot);
                        done_flag.store(true, Ordering::SeqCst);
                    }
                    Err(err) => eprintln!("Malformed statistics payload: {}", err),
                }
            }
        }
        Some(PdError::Timeout) => {
            println!("Packet timed out (ComID {}, SrcIP: {})", info.com_id, info.src_ip);
        }
        Some(err) => {
            println!("Error on packet received (ComID {}): {}", info.com_id, err);
        }
    });

    let transport = UdpTransport::new(args.own_ip, 64)?;
    let now = Instant::now();
    let mut session = PdSession::new(
        transport,
        args.own_ip,
        PdConfig::default(),
        SessionOptions::default(),
        Some(callback),
        now,
    )?;

    // Expect the reply on the statistics ComID, then trigger the pull.
    let sub = session.subscribe(
        GLOBAL_STATISTICS_COMID,
        None,
        args.reply_ip,
        Some(Duration::from_secs(5)),
        PktFlags::CALLBACK,
        0,
        now,
    )?;
    session.request(
        STATISTICS_REQUEST_COMID,
        args.target_ip,
        GLOBAL_STATISTICS_COMID,
        args.reply_ip,
    )?;
    // The request leaves on the next engine turn; take that turn now.
    session.process(&[], Instant::now())?;

    while running.load(Ordering::SeqCst) && !done.load(Ordering::SeqCst) {
        let now = Instant::now();
        let (wait, _watch) = session.get_interval(now);
        let ready = session.transport_mut().wait(wait)?;
        if let Err(err) = session.process(&ready, Instant::now()) {
            log::warn!("process: {}", err);
        }
    }

    session.unsubscribe(sub)?;
    Ok(())
}

fn print_stats(snapshot: &StatsSnapshot) {
    println!("--------------------");
    println!("version:        {:08x}", snapshot.version);
    println!("upTime:         {} s", snapshot.up_time_s);
    println!("statisticTime:  {} s", snapshot.stats_time_s);
    println!("ownIpAddr:      {}", snapshot.own_ip);
    println!("pd.defQos:      {}", snapshot.def_qos);
    println!("pd.defTtl:      {}", snapshot.def_ttl);
    println!("pd.defTimeout:  {} us", snapshot.def_timeout_us);
    println!("pd.numSubs:     {}", snapshot.pd.num_subs);
    println!("pd.numPub:      {}", snapshot.pd.num_pub);
    println!("pd.numRcv:      {}", snapshot.pd.num_rcv);
    println!("pd.numCrcErr:   {}", snapshot.pd.num_crc_err);
    println!("pd.numProtErr:  {}", snapshot.pd.num_prot_err);
    println!("pd.numTopoErr:  {}", snapshot.pd.num_topo_err);
    println!("pd.numNoSubs:   {}", snapshot.pd.num_no_subs);
    println!("pd.numNoPub:    {}", snapshot.pd.num_no_pub);
    println!("pd.numTimeout:  {}", snapshot.pd.num_timeout);
    println!("pd.numSend:     {}", snapshot.pd.num_send);
    println!("--------------------");
}
